use std::sync::Arc;

use anyhow::Context;
use storefront_core::SystemClock;

use storefront_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    storefront_observability::init();

    let config = ApiConfig::from_env().context("invalid configuration")?;
    let bind_addr = config.bind_addr;

    let app = storefront_api::app::build_app(config, Arc::new(SystemClock))
        .await
        .context("failed to wire services")?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
