use std::sync::Arc;

use anyhow::Context;
use innkeep_api::lifecycle::{self, Clients};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    innkeep_observability::init();

    let clients = Arc::new(Clients::from_env());
    lifecycle::startup(&clients).await;

    let app = innkeep_api::app::build_app(clients.clone());

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(lifecycle::shutdown_signal())
        .await
        .context("http server failed")?;

    lifecycle::shutdown(&clients).await;
    tracing::info!("shutdown complete");
    Ok(())
}
