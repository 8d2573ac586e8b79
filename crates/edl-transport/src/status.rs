//! HTTP status endpoint.
//!
//! `GET /health` reports transport and dispatch state for operators and
//! launch scripts. It never touches the editor model.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use edl_protocol::commands::SERVER_VERSION;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::server::{CommandSink, Shared, TransportError};

pub(crate) async fn serve<S: CommandSink>(
    addr: SocketAddr,
    shared: Arc<Shared<S>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(JoinHandle<()>, SocketAddr), TransportError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind { addr, source })?;
    let bound = listener
        .local_addr()
        .map_err(|source| TransportError::Bind { addr, source })?;

    let app = Router::new()
        .route("/health", get(health_handler::<S>))
        .with_state(shared);

    info!("Status endpoint on http://{bound}/health");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
            .ok();
    });

    Ok((handle, bound))
}

async fn health_handler<S: CommandSink>(State(shared): State<Arc<Shared<S>>>) -> impl IntoResponse {
    let connections: Vec<_> = shared.connections.iter().map(|c| c.summary()).collect();
    Json(json!({
        "status": "ok",
        "serverVersion": SERVER_VERSION,
        "clients": shared.open_connections(),
        "connections": connections,
        "server": shared.sink.status(),
    }))
}
