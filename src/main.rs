use std::path::Path;

use anyhow::Result;
use bc_calculator::utils::logging;
use bc_calculator::{App, Config};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 加载配置：BC_CONFIG 指向 TOML 文件时优先使用
    let config = match std::env::var("BC_CONFIG") {
        Ok(path) => Config::from_toml_file(Path::new(&path))?,
        Err(_) => Config::from_env(),
    };

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    let app = App::initialize(config).await?;
    app.run().await?;

    Ok(())
}
