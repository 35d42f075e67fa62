//! Interview server binary.
//!
//! Loads configuration (TOML file plus environment credentials), validates
//! it, and serves the WebSocket interview endpoint until stopped. A fatal
//! configuration error aborts startup with a critical log enumerating every
//! missing or malformed option.

use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("ARON_CONFIG")
        .map_or_else(|_| PathBuf::from("aron.toml"), PathBuf::from);

    let config = aron::AppConfig::load(&config_path).map_err(|e| {
        tracing::error!(error = %e, "cannot start: {e}");
        anyhow::anyhow!("startup aborted: {e}")
    })?;

    tracing::info!("aron-server starting");

    aron::server::run(config).await.map_err(|e| {
        tracing::error!(error = %e, "aron-server exited with error");
        anyhow::anyhow!("aron-server failed: {e}")
    })?;

    tracing::info!("aron-server shut down cleanly");
    Ok(())
}
