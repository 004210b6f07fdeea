pub mod auth;
pub mod chat;
pub mod knowledge;

use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Liveness check.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "cricket-chat",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
