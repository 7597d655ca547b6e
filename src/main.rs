//! Yoyo server - main entry point.

use anyhow::Result;
use yoyo_server::config::Config;
use yoyo_server::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("yoyo-server v{}", env!("CARGO_PKG_VERSION"));

    yoyo_server::start_server(&config).await
}
