//! Relay record management: the surrounding host creates a record when it
//! first routes a conversation to a skill and deletes it when the
//! conversation ends. The interceptor only ever reads these.

use crate::server::BridgeState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, post};
use axum::{Extension, Json};
use sb_relay::{ConversationStore, RelayRecord};
use sb_schema::ConversationReference;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct CreateConversationRequest {
    conversation_reference: ConversationReference,
    #[serde(default)]
    oauth_scope: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/bridge/conversations", post(create_conversation))
        .route(
            "/api/v1/bridge/conversations/{conversation_id}",
            delete(delete_conversation),
        )
}

#[tracing::instrument(level = "info", skip_all)]
async fn create_conversation(
    Extension(state): Extension<Arc<BridgeState>>,
    Json(req): Json<CreateConversationRequest>,
) -> impl IntoResponse {
    let conversation_id = Uuid::new_v4().simple().to_string();
    let record = RelayRecord {
        conversation_reference: req.conversation_reference,
        oauth_scope: req.oauth_scope,
    };

    if let Err(e) = state.store.put(&conversation_id, record).await {
        tracing::error!(error = %e, "failed to persist relay record");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "error": "failed to persist relay record" })),
        );
    }

    (
        StatusCode::CREATED,
        Json(json!({ "status": "ok", "conversation_id": conversation_id })),
    )
}

#[tracing::instrument(level = "info", skip_all, fields(conversation_id = %conversation_id))]
async fn delete_conversation(
    Extension(state): Extension<Arc<BridgeState>>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete(&conversation_id).await {
        Ok(deleted) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "deleted": deleted })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to delete relay record");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "error": "failed to delete relay record" })),
            )
        }
    }
}
