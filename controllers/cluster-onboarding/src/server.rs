//! # HTTP Server
//!
//! Provides endpoints:
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/readyz` - Readiness probe (200 once the onboarding watcher has synced)
//! - `/validate-clusteronboarding` - ClusterOnboarding validating webhook
//!
//! Plain HTTP; TLS for the webhook is terminated in front of the pod.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::admission::validate_handler;
use crate::error::ControllerError;

/// State shared by the HTTP handlers
#[derive(Debug, Default)]
pub struct ServerState {
    /// Flipped by the onboarding watcher after its first list
    pub is_ready: Arc<AtomicBool>,
}

/// Routes of the probe/admission server
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/validate-clusteronboarding", post(validate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves [`router`] on `addr` until the listener fails
pub async fn start_server(addr: SocketAddr, state: Arc<ServerState>) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
