//! 日志工具模块
//!
//! 提供日志初始化和输出的辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::PoolStatus;

/// 初始化日志
///
/// 日志写到 stderr，stdout 只用于协议响应。`RUST_LOG` 优先于 `verbose`。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 测试中可能被多次调用
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 BC 计算服务启动 - {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("📊 进程数: {}，默认精度: {}", config.pool_size, config.default_precision);
    info!("⏱️ 默认超时: {}ms", config.default_timeout_ms);
    info!("{}", "=".repeat(60));
}

/// 记录进程池状态
pub fn log_pool_status(status: &PoolStatus) {
    info!(
        "📋 进程池状态: 共 {} 个，空闲 {} 个，忙碌 {} 个",
        status.total, status.available, status.busy
    );
}

/// 截断长文本用于显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（字符数）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
