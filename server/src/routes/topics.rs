//! Relay statistics.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::AppState;

/// Server-wide counts.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: usize,
    pub topics: usize,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

/// Subscribers of one topic.
#[derive(Debug, Serialize)]
pub struct TopicResponse {
    pub topic: String,
    pub subscribers: usize,
}

/// Create stats routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/topics/{topic}", get(topic))
}

/// GET /stats
async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.conn_manager.connection_count(),
        topics: state.conn_manager.topic_count(),
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /topics/{topic}
async fn topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<Json<TopicResponse>> {
    if topic.chars().any(char::is_control) {
        return Err(AppError::BadRequest("topic contains control characters".into()));
    }
    let subscribers = state
        .conn_manager
        .subscriber_count(&topic)
        .ok_or_else(|| AppError::NotFound(format!("no subscribers on {topic}")))?;
    Ok(Json(TopicResponse { topic, subscribers }))
}
