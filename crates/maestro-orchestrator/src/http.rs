//! Health and metrics endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::AppState;

/// GET /health — liveness probe.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "cached_instances": state.factory.cached_instance_count(),
    }))
}

/// GET /metrics — Prometheus exposition.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, cancel: CancellationToken) {
    let addr: SocketAddr = match format!(
        "{}:{}",
        state.config.observability.bind, state.config.observability.port
    )
    .parse()
    {
        Ok(addr) => addr,
        Err(e) => {
            warn!(error = %e, "invalid observability bind address, http surface disabled");
            return;
        }
    };
    let router = build_router(state);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(error = %e, %addr, "could not bind http surface");
            return;
        }
    };
    info!(%addr, "health/metrics endpoint listening");
    let _ = axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
}
