//! HTTP/WebSocket transport for the async-job deployment.
//!
//! Thin glue over the orchestration core: dispatch/poll/wait endpoints,
//! session lifecycle, escalation, and the teacher observer WebSocket.
//! Middleware concerns (CORS, CSRF, rate limiting, auth) sit in front of
//! this router and are not its business.

pub mod routes;

pub use routes::{AppState, router};

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Bind and serve until `shutdown` is cancelled.
pub async fn serve(state: AppState, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "voice-tutor backend listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")
}
