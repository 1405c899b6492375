//! 进程退出原因分析

use std::fmt;
use std::process::ExitStatus;

/// BC 进程终止的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// 正常退出，带退出码
    Exited(i32),
    /// 被信号终止
    Signaled(i32),
    /// 被本服务主动终止
    Killed,
    /// 无法获取退出状态
    Unknown,
}

impl ExitReason {
    /// 从 `ExitStatus` 解析终止原因
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitReason::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitReason::Signaled(signal);
            }
        }

        ExitReason::Unknown
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitReason::Exited(0))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Exited(code) => write!(f, "退出码 {}", code),
            ExitReason::Signaled(signal) => write!(f, "被信号 {} 终止", signal),
            ExitReason::Killed => write!(f, "已被终止"),
            ExitReason::Unknown => write!(f, "未知原因"),
        }
    }
}
