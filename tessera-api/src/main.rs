use anyhow::Context;
use tessera_api::{router, AppState};
use tessera_core::config::Config;
use tessera_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("TESSERA_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading config {}", path))?,
        Err(_) => Config::from_env().context("loading config from environment")?,
    };

    init_logging_with_config(LogConfig {
        level: LogLevel::parse(&config.logging.level).unwrap_or(LogLevel::Info),
        with_target: config.logging.with_target,
        json_format: config.logging.json_format,
    })
    .map_err(|e| anyhow::anyhow!(e))?;

    let bind_address = config.server.bind_address;
    let state = AppState::from_config(config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("binding {}", bind_address))?;
    info!("listening on {}", bind_address);

    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
