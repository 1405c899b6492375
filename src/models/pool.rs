//! 进程池相关的数据类型

use std::time::Duration;

use serde::Serialize;

use super::worker::{EngineCommand, WorkerOptions};

/// 进程池配置（构造后不可变）
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 进程数量
    pub pool_size: usize,
    /// 新进程的默认精度
    pub default_precision: u32,
    /// 默认计算超时
    pub default_timeout: Duration,
    /// 获取空闲进程的最长等待时间
    pub acquire_timeout: Duration,
    /// 启动命令
    pub engine: EngineCommand,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            default_precision: 20,
            default_timeout: Duration::from_millis(30_000),
            acquire_timeout: Duration::from_secs(30),
            engine: EngineCommand::default(),
        }
    }
}

impl PoolConfig {
    /// 池中每个进程使用的配置
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            precision: self.default_precision,
            timeout: self.default_timeout,
            engine: self.engine.clone(),
        }
    }
}

/// 进程池状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub initialized: bool,
    pub total: usize,
    pub available: usize,
    pub busy: usize,
}
