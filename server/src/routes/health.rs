//! Health check and relay entry point.
//!
//! Endpoint probes send a plain `HEAD /`, so `/` answers ordinary HTTP with
//! 200 and only upgrades requests that ask for a WebSocket.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::handlers::handle_websocket_connection;
use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Root handler: the relay socket, or a liveness answer for plain HTTP.
async fn root(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => {
            let conn_manager = state.conn_manager.clone();
            let ping_interval = state.config.ping_interval;
            ws.on_upgrade(move |socket| {
                handle_websocket_connection(socket, conn_manager, ping_interval)
            })
        }
        Err(_) => "okay".into_response(),
    }
}
