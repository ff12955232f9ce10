use std::sync::Arc;

use anyhow::Context;

use tallyerp_api::app::{build_app, services::AppServices};
use tallyerp_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tallyerp_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = AppServices::from_config(&config).await?;
    let app = build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, store = ?config.store, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
