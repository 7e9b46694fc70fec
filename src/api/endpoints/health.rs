//! Liveness probe.

use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::config;

/// `GET /health` — unauthenticated liveness check.
pub async fn check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": config::APP_VERSION,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
