use std::fmt;

use thiserror::Error;

use crate::infrastructure::exit::ExitReason;

/// 计算服务错误类型
///
/// 每个变体对应一种可被调用方识别的失败类别，`kind()` 给出机器可读的错误码。
#[derive(Debug, Error)]
pub enum CalcError {
    /// 输入未通过校验（表达式或精度），从未到达 BC 进程
    #[error("校验失败: {0}")]
    Validation(String),

    /// 进程或进程池不可用
    #[error("BC 进程不可用: {0}")]
    NotReady(String),

    /// 进程已有未完成的请求（调用方违反单请求约定）
    #[error("BC 进程 #{worker_id} 正忙于另一个计算")]
    Busy { worker_id: usize },

    /// BC 在 stderr 上报告的计算错误（例如除零）
    #[error("BC 错误: {0}")]
    Runtime(String),

    /// 计算超时，对应进程已被终止
    #[error("计算超时 ({timeout_ms}ms)")]
    Timeout { timeout_ms: u128 },

    /// 进程在请求未完成时退出
    #[error("BC 进程 #{worker_id} 意外退出: {reason}")]
    ProcessExit { worker_id: usize, reason: ExitReason },

    /// 无法启动 BC 进程
    #[error("启动 BC 进程失败: {message}")]
    Spawn {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// 与一个本应健康的进程通信失败
    #[error("内部错误: {0}")]
    Internal(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

/// 机器可读的错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotReady,
    Runtime,
    Timeout,
    ProcessExit,
    Spawn,
    Internal,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotReady => "BC_NOT_READY",
            ErrorKind::Runtime => "BC_RUNTIME_ERROR",
            ErrorKind::Timeout => "BC_TIMEOUT",
            ErrorKind::ProcessExit => "BC_PROCESS_EXIT",
            ErrorKind::Spawn => "BC_SPAWN_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
            ErrorKind::Config => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CalcError {
    /// 错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalcError::Validation(_) => ErrorKind::Validation,
            CalcError::NotReady(_) | CalcError::Busy { .. } => ErrorKind::NotReady,
            CalcError::Runtime(_) => ErrorKind::Runtime,
            CalcError::Timeout { .. } => ErrorKind::Timeout,
            CalcError::ProcessExit { .. } => ErrorKind::ProcessExit,
            CalcError::Spawn { .. } => ErrorKind::Spawn,
            CalcError::Internal(_) => ErrorKind::Internal,
            CalcError::Config(_) => ErrorKind::Config,
        }
    }

    /// 该错误发生后，产生它的进程是否已不可再用
    pub fn is_worker_fatal(&self) -> bool {
        matches!(
            self,
            CalcError::Timeout { .. }
                | CalcError::ProcessExit { .. }
                | CalcError::Spawn { .. }
                | CalcError::Internal(_)
        )
    }
}

// ========== 从常见错误类型转换 ==========

impl From<std::io::Error> for CalcError {
    fn from(err: std::io::Error) -> Self {
        CalcError::Internal(err.to_string())
    }
}

impl From<regex::Error> for CalcError {
    fn from(err: regex::Error) -> Self {
        CalcError::Config(format!("正则表达式无效: {}", err))
    }
}

impl From<toml::de::Error> for CalcError {
    fn from(err: toml::de::Error) -> Self {
        CalcError::Config(format!("TOML解析失败: {}", err))
    }
}

// ========== 便捷构造函数 ==========

impl CalcError {
    /// 创建校验错误
    pub fn validation(message: impl Into<String>) -> Self {
        CalcError::Validation(message.into())
    }

    /// 创建不可用错误
    pub fn not_ready(message: impl Into<String>) -> Self {
        CalcError::NotReady(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        CalcError::Internal(message.into())
    }

    /// 创建启动失败错误
    pub fn spawn_failed(message: impl Into<String>, source: Option<std::io::Error>) -> Self {
        CalcError::Spawn {
            message: message.into(),
            source,
        }
    }
}

// ========== Result 类型别名 ==========

/// 计算服务结果类型
pub type Result<T> = std::result::Result<T, CalcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(CalcError::validation("x").kind().as_str(), "VALIDATION_ERROR");
        assert_eq!(CalcError::Busy { worker_id: 1 }.kind(), ErrorKind::NotReady);
        assert_eq!(
            CalcError::Timeout { timeout_ms: 10 }.kind().to_string(),
            "BC_TIMEOUT"
        );
        assert_eq!(CalcError::Runtime("x".into()).kind().as_str(), "BC_RUNTIME_ERROR");
    }

    #[test]
    fn test_worker_fatal() {
        assert!(CalcError::Timeout { timeout_ms: 1 }.is_worker_fatal());
        assert!(CalcError::internal("pipe").is_worker_fatal());
        assert!(!CalcError::Runtime("Divide by zero".into()).is_worker_fatal());
        assert!(!CalcError::validation("bad").is_worker_fatal());
        assert!(!CalcError::Busy { worker_id: 0 }.is_worker_fatal());
    }

    #[test]
    fn test_message_contains_detail() {
        let err = CalcError::ProcessExit {
            worker_id: 3,
            reason: ExitReason::Exited(1),
        };
        let msg = err.to_string();
        assert!(msg.contains("#3"));
        assert!(msg.contains('1'));
    }
}
