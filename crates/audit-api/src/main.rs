//! Comments gateway REST server with ledger-backed auditing.

use audit_api::server::{self, AppState};
use audit_core::AuditConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AuditConfig::from_env()?;
    tracing::debug!(?config, "configuration loaded");
    let ledger = server::connect_ledger(&config).await?;

    let state = Arc::new(AppState::resume(ledger, &config).await?);
    let app = server::router(state);
    let addr: SocketAddr = std::env::var("AUDIT_API_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:8001".to_string())
        .parse()?;
    tracing::info!("audit API listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await?;
    Ok(())
}
