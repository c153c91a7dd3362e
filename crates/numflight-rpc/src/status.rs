//! HTTP status sidecar using Axum.
//!
//! Read-only view of a running server: liveness and the descriptors the
//! dispatcher currently tracks. Array traffic never goes through here.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use numflight::{ComputeDispatcher, DescriptorStatus, Location};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// State shared across status handlers.
pub struct StatusState {
    /// Dispatcher of the flight server being observed
    pub dispatcher: Arc<ComputeDispatcher>,
    /// Address the flight server listens on
    pub flight_addr: SocketAddr,
}

async fn handle_health(State(state): State<Arc<StatusState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "location": Location::from(state.flight_addr).to_string(),
        "tracked": state.dispatcher.len().await,
    }))
}

async fn handle_descriptors(State(state): State<Arc<StatusState>>) -> Json<Vec<DescriptorStatus>> {
    Json(state.dispatcher.snapshot().await)
}

/// Build the status router.
pub fn router(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/descriptors", get(handle_descriptors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the status server in the background.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_status_server(
    state: Arc<StatusState>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Status server listening on {}", actual_addr);

    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Status server error: {}", e);
        }
    });

    Ok(actual_addr)
}
