/// Entry point: loads configuration, builds the [`Orchestrator`], and drives
/// it until a Ctrl+C or an operator `stop` brings the session down cleanly.
use std::sync::Arc;

use tracing::{error, info, warn};

use nifty_options_engine::config::load_config;
use nifty_options_engine::error::Result;
use nifty_options_engine::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nifty_options_engine=info")),
        )
        .init();

    info!("starting nifty options engine");

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = load_config(&config_path)?;
    if config.broker_bearer_token.is_empty() {
        warn!("BROKER_BEARER_TOKEN is not set; live order submission is disabled, feed auth will fail");
    }

    let orchestrator = Arc::new(Orchestrator::new(config).await?);

    let shutdown_handle = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl_c: {e}");
            return;
        }
        info!("ctrl+c received, initiating graceful shutdown");
        shutdown_handle.shutdown().await;
    });

    orchestrator.run().await?;

    info!("engine stopped");
    Ok(())
}
