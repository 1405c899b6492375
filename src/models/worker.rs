//! BC 进程相关的数据类型

use std::fmt;
use std::time::Duration;

/// 精度（小数位数）允许的最大值
pub const MAX_PRECISION: u32 = 100;

/// 进程状态
///
/// `Starting → Ready ⇄ Busy → Dead`，`Dead` 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Ready,
    Busy,
    Dead,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Starting => "starting",
            WorkerState::Ready => "ready",
            WorkerState::Busy => "busy",
            WorkerState::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// 外部计算程序的启动命令
///
/// 直接以参数列表启动，不经过 shell。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    /// 可执行文件路径
    pub program: String,
    /// 启动参数（`-l` 加载数学函数库）
    pub args: Vec<String>,
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self {
            program: "bc".to_string(),
            args: vec!["-l".to_string()],
        }
    }
}

/// 单个 BC 进程的配置
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// 启动后设置的精度
    pub precision: u32,
    /// 默认超时时间
    pub timeout: Duration,
    /// 启动命令
    pub engine: EngineCommand,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            precision: 20,
            timeout: Duration::from_millis(30_000),
            engine: EngineCommand::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(WorkerState::Ready.to_string(), "ready");
        assert_eq!(WorkerState::Dead.to_string(), "dead");
    }

    #[test]
    fn test_default_engine_is_bc_with_math_library() {
        let options = WorkerOptions::default();
        assert_eq!(options.engine, EngineCommand::default());
        assert_eq!(options.engine.program, "bc");
        assert_eq!(options.engine.args, ["-l"]);
        assert_eq!(options.precision, 20);
    }
}
