use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::health::FeedHealth;
use crate::metrics::encode_metrics;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub feed: String,
    pub health: String,
    pub connected: bool,
    pub reconnect_failed: bool,
}

/// Shared state for health endpoints
#[derive(Clone)]
pub struct ServerState {
    pub feed_name: String,
    pub health: Arc<FeedHealth>,
}

impl ServerState {
    pub fn new(feed_name: impl Into<String>, health: Arc<FeedHealth>) -> Self {
        Self {
            feed_name: feed_name.into(),
            health,
        }
    }

    fn response(&self, status: &str) -> HealthResponse {
        HealthResponse {
            status: status.to_string(),
            feed: self.feed_name.clone(),
            health: self.health.health().to_string(),
            connected: self.health.is_connected(),
            reconnect_failed: self.health.reconnect_failed(),
        }
    }
}

/// Health endpoint - always returns 200 if server is running
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(state.response("ok"))
}

/// Ready endpoint - 200 only while the feed is connected and has never failed to reconnect
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    if state.health.is_ready() {
        (StatusCode::OK, Json(state.response("ready")))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(state.response("not_ready")),
        )
    }
}

/// Prometheus text exposition
async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// Create the health server router
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server until `shutdown` flips to true
pub async fn run_server(
    addr: SocketAddr,
    state: ServerState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
