use crate::server::BridgeState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/bridge/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<BridgeState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "ready": true,
        "checked_at": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "registered_skills": state.skill_count,
    }))
}
