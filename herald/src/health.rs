//! Health check handler

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service name
    pub service: String,

    /// Version
    pub version: String,

    /// Connected stream listeners
    pub subscribers: usize,
}

/// Simple health check (liveness probe)
///
/// Always returns 200 OK while the service is running. Waits on the broker
/// lock for the subscriber count, so a publish stalled on a slow consumer
/// shows up here as a slow probe.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config().service.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        subscribers: state.broker().subscriber_count().await,
    };

    (StatusCode::OK, Json(response))
}
