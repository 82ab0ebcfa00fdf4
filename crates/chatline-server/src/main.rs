use anyhow::{anyhow, Result};
use chatline_server::{config::ServerConfig, server, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env();
    telemetry::init(config.log_format).map_err(|e| anyhow!("failed to initialize telemetry: {e}"))?;

    info!("Chatline Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    config.log_config();

    server::start(config).await?;

    Ok(())
}
