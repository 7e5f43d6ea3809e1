//! `docuchat serve` — Start the HTTP gateway server.

use docuchat_config::AppConfig;
use tracing::info;

pub async fn run(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load()?;

    if let Some(port) = port {
        config.gateway.port = port;
    }

    info!(
        port = config.gateway.port,
        chat_model = %config.chat_model,
        "Starting docuchat gateway"
    );

    docuchat_gateway::start(config).await
}
