use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CalcError, Result};
use crate::models::worker::MAX_PRECISION;
use crate::models::{EngineCommand, PoolConfig};

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// BC 进程数量
    pub pool_size: usize,
    /// 默认精度（小数位数）
    pub default_precision: u32,
    /// 单次计算的默认超时（毫秒）
    pub default_timeout_ms: u64,
    /// 等待空闲进程的最长时间（毫秒）
    pub acquire_timeout_ms: u64,
    /// BC 可执行文件
    pub bc_path: String,
    /// BC 启动参数
    pub bc_args: Vec<String>,
    /// 表达式最大长度
    pub max_expression_length: usize,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineCommand::default();
        Self {
            pool_size: 3,
            default_precision: 20,
            default_timeout_ms: 30_000,
            acquire_timeout_ms: 30_000,
            bc_path: engine.program,
            bc_args: engine.args,
            max_expression_length: 10_000,
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            pool_size: std::env::var("BC_POOL_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.pool_size),
            default_precision: std::env::var("BC_DEFAULT_PRECISION").ok().and_then(|v| v.parse().ok()).unwrap_or(default.default_precision),
            default_timeout_ms: std::env::var("BC_DEFAULT_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.default_timeout_ms),
            acquire_timeout_ms: std::env::var("BC_ACQUIRE_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.acquire_timeout_ms),
            bc_path: std::env::var("BC_PATH").unwrap_or(default.bc_path),
            bc_args: default.bc_args,
            max_expression_length: std::env::var("BC_MAX_EXPRESSION_LENGTH").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_expression_length),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
        }
    }

    /// 从 TOML 文件加载，缺省的字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CalcError::Config(format!("无法读取配置文件 {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(CalcError::Config("pool_size 必须大于 0".to_string()));
        }
        if self.default_precision > MAX_PRECISION {
            return Err(CalcError::Config(format!(
                "default_precision 必须在 0 到 {} 之间，实际为 {}",
                MAX_PRECISION, self.default_precision
            )));
        }
        if self.default_timeout_ms == 0 || self.acquire_timeout_ms == 0 {
            return Err(CalcError::Config("超时时间必须大于 0".to_string()));
        }
        if self.bc_path.trim().is_empty() {
            return Err(CalcError::Config("bc_path 不能为空".to_string()));
        }
        Ok(())
    }

    /// 进程池配置
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            default_precision: self.default_precision,
            default_timeout: Duration::from_millis(self.default_timeout_ms),
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            engine: EngineCommand {
                program: self.bc_path.clone(),
                args: self.bc_args.clone(),
            },
        }
    }
}
