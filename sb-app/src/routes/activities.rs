//! Channel-service activity endpoints. Every outbound activity from a skill
//! lands here and runs through the token-exchange interceptor before normal
//! delivery.

use crate::claims;
use crate::delivery::ActivitySink;
use crate::server::BridgeState;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json};
use sb_relay::InterceptOutcome;
use sb_schema::{Activity, ActivityId, ConversationId};
use serde_json::json;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route(
            "/api/skills/v3/conversations/{conversation_id}/activities",
            post(send_to_conversation),
        )
        .route(
            "/api/skills/v3/conversations/{conversation_id}/activities/{activity_id}",
            post(reply_to_activity),
        )
}

#[tracing::instrument(level = "info", skip_all, fields(conversation_id = %conversation_id))]
async fn send_to_conversation(
    Extension(state): Extension<Arc<BridgeState>>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Json(activity): Json<Activity>,
) -> Response {
    let identity = claims::identity_from_headers(&headers);
    if !state.caller_policy.is_allowed(&identity) {
        return unauthorized();
    }

    let conversation_id = ConversationId::new(conversation_id);
    let cancel = state.shutdown.child_token();
    let outcome = state
        .interceptor
        .on_send_to_conversation(&identity, &conversation_id, activity, &cancel)
        .await;
    finish(&state, &conversation_id, outcome).await
}

#[tracing::instrument(level = "info", skip_all, fields(conversation_id = %conversation_id, activity_id = %activity_id))]
async fn reply_to_activity(
    Extension(state): Extension<Arc<BridgeState>>,
    Path((conversation_id, activity_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(activity): Json<Activity>,
) -> Response {
    let identity = claims::identity_from_headers(&headers);
    if !state.caller_policy.is_allowed(&identity) {
        return unauthorized();
    }

    let conversation_id = ConversationId::new(conversation_id);
    let activity_id = ActivityId::new(activity_id);
    let cancel = state.shutdown.child_token();
    let outcome = state
        .interceptor
        .on_reply_to_activity(&identity, &conversation_id, &activity_id, activity, &cancel)
        .await;
    finish(&state, &conversation_id, outcome).await
}

async fn finish(
    state: &BridgeState,
    conversation_id: &ConversationId,
    outcome: Result<InterceptOutcome, sb_schema::SchemaError>,
) -> Response {
    match outcome {
        Ok(InterceptOutcome::Intercepted(resource)) => Json(resource).into_response(),
        Ok(InterceptOutcome::PassThrough(activity)) => {
            match state.sink.deliver(conversation_id, &activity).await {
                Ok(resource) => Json(resource).into_response(),
                Err(e) => {
                    tracing::error!(error = %e, "activity delivery failed");
                    (
                        StatusCode::BAD_GATEWAY,
                        Json(json!({ "status": "error", "error": "activity delivery failed" })),
                    )
                        .into_response()
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "rejecting malformed activity");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "status": "error", "error": "caller is not allowed" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::CallerPolicy;
    use crate::delivery::ActivitySink;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use axum::http::header::AUTHORIZATION;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use reqwest::Url;
    use sb_relay::{
        ConversationStore, InMemoryConversationStore, RelayRecord, RelaySettings,
        SkillDescriptor, SkillRegistry, SkillTransport, TokenExchangeInterceptor,
        TokenExchangeOutcome, TokenExchanger,
    };
    use sb_schema::{
        ActivityType, AppId, Attachment, ChannelAccount, ConversationAccount,
        ConversationReference, OAUTH_CARD_CONTENT_TYPE, ResourceResponse,
    };
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    const SKILL_APP_ID: &str = "1111-aaaa";

    struct StaticExchanger {
        outcome: TokenExchangeOutcome,
    }

    #[async_trait]
    impl TokenExchanger for StaticExchanger {
        async fn exchange(
            &self,
            _user_id: &str,
            _connection_name: &str,
            _channel_id: &str,
            _resource_uri: &str,
            _cancel: &CancellationToken,
        ) -> TokenExchangeOutcome {
            self.outcome.clone()
        }
    }

    struct CountingTransport {
        posts: AtomicUsize,
    }

    #[async_trait]
    impl SkillTransport for CountingTransport {
        async fn post_activity(
            &self,
            _bot_id: &str,
            _target_app_id: &AppId,
            _endpoint: &Url,
            _host_endpoint: &Url,
            _conversation_id: &ConversationId,
            _activity: &Activity,
            _cancel: &CancellationToken,
        ) -> Result<u16> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(200)
        }
    }

    struct RecordingSink {
        delivered: Mutex<Vec<Activity>>,
    }

    #[async_trait]
    impl ActivitySink for RecordingSink {
        async fn deliver(
            &self,
            _conversation_id: &ConversationId,
            activity: &Activity,
        ) -> Result<ResourceResponse> {
            self.delivered
                .lock()
                .expect("delivered lock")
                .push(activity.clone());
            Ok(ResourceResponse {
                id: "delivered-1".to_string(),
            })
        }
    }

    struct Harness {
        router: axum::Router,
        store: Arc<InMemoryConversationStore>,
        transport: Arc<CountingTransport>,
        sink: Arc<RecordingSink>,
    }

    fn harness(outcome: TokenExchangeOutcome, policy: CallerPolicy) -> Harness {
        let registry = Arc::new(SkillRegistry::new(vec![SkillDescriptor {
            id: "echo-skill".to_string(),
            app_id: AppId::new(SKILL_APP_ID),
            endpoint: Url::parse("https://echo.skill.example/api/messages").expect("url"),
        }]));
        let store = Arc::new(InMemoryConversationStore::new());
        let transport = Arc::new(CountingTransport {
            posts: AtomicUsize::new(0),
        });
        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(Vec::new()),
        });

        let interceptor = TokenExchangeInterceptor::new(
            RelaySettings {
                bot_id: "host-app-id".to_string(),
                connection_name: "sso-connection".to_string(),
                host_endpoint: Url::parse("https://host.example/api/skills").expect("url"),
            },
            registry.clone(),
            store.clone(),
            Arc::new(StaticExchanger { outcome }),
            transport.clone(),
        );

        let state = Arc::new(BridgeState {
            started_at: Instant::now(),
            interceptor,
            store: store.clone(),
            sink: sink.clone(),
            caller_policy: policy,
            skill_count: registry.len(),
            shutdown: CancellationToken::new(),
        });

        Harness {
            router: crate::routes::router().layer(Extension(state)),
            store,
            transport,
            sink,
        }
    }

    fn unsigned_jwt(app_id: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD
            .encode(serde_json::json!({ "appid": app_id, "ver": "1.0" }).to_string().as_bytes());
        format!("{header}.{payload}.")
    }

    fn oauth_card_activity(conversation: &str) -> Activity {
        let mut activity = Activity::new(ActivityType::Message);
        activity.id = Some("card-activity-1".into());
        activity.channel_id = Some("emulator".to_string());
        activity.service_url = Some("https://connector.example".to_string());
        activity.conversation = Some(ConversationAccount::new(conversation));
        activity.from = Some(ChannelAccount::new("echo-skill-bot"));
        activity.recipient = Some(ChannelAccount::new("user-1"));
        activity.attachments.push(Attachment {
            content_type: OAUTH_CARD_CONTENT_TYPE.to_string(),
            content: serde_json::json!({
                "connectionName": "sso-connection",
                "tokenExchangeResource": { "id": "resource-1", "uri": "api://resource" },
            }),
        });
        activity
    }

    fn relay_record(original_conversation: &str) -> RelayRecord {
        RelayRecord {
            conversation_reference: ConversationReference {
                activity_id: None,
                user: Some(ChannelAccount::new("user-1")),
                bot: Some(ChannelAccount::new("echo-skill-bot")),
                conversation: ConversationAccount::new(original_conversation),
                channel_id: "emulator".to_string(),
                service_url: "https://connector.example".to_string(),
            },
            oauth_scope: None,
        }
    }

    fn post_activity_request(uri: &str, token: Option<&str>, activity: &Activity) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .body(Body::from(
                serde_json::to_vec(activity).expect("serialize activity"),
            ))
            .expect("request")
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        serde_json::from_slice(&body).expect("response json")
    }

    #[tokio::test]
    async fn disallowed_caller_is_rejected() {
        let harness = harness(
            TokenExchangeOutcome::NotExchangeable,
            CallerPolicy::new(vec![SKILL_APP_ID.to_string()]),
        );
        let activity = Activity::new(ActivityType::Message);

        let response = harness
            .router
            .oneshot(post_activity_request(
                "/api/skills/v3/conversations/conv-1/activities",
                None,
                &activity,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(harness.sink.delivered.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn plain_activity_is_delivered_through_sink() {
        let harness = harness(
            TokenExchangeOutcome::NotExchangeable,
            CallerPolicy::new(vec![SKILL_APP_ID.to_string()]),
        );
        let mut activity = Activity::new(ActivityType::Message);
        activity.text = Some("hello from the skill".to_string());

        let response = harness
            .router
            .oneshot(post_activity_request(
                "/api/skills/v3/conversations/conv-1/activities",
                Some(&unsigned_jwt(SKILL_APP_ID)),
                &activity,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["id"], serde_json::json!("delivered-1"));

        let delivered = harness.sink.delivered.lock().expect("lock");
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].text.as_deref(), Some("hello from the skill"));
    }

    #[tokio::test]
    async fn exchangeable_card_is_intercepted_not_delivered() {
        let harness = harness(
            TokenExchangeOutcome::Exchanged("exchanged-token".to_string()),
            CallerPolicy::new(vec![SKILL_APP_ID.to_string()]),
        );
        harness
            .store
            .put("conv-1", relay_record("conv-original"))
            .await
            .expect("seed relay record");

        let response = harness
            .router
            .oneshot(post_activity_request(
                "/api/skills/v3/conversations/conv-1/activities",
                Some(&unsigned_jwt(SKILL_APP_ID)),
                &oauth_card_activity("conv-1"),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_ne!(body["id"], serde_json::json!("delivered-1"));

        assert!(harness.sink.delivered.lock().expect("lock").is_empty());
        assert_eq!(harness.transport.posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reply_endpoint_runs_the_same_pipeline() {
        let harness = harness(
            TokenExchangeOutcome::Exchanged("exchanged-token".to_string()),
            CallerPolicy::new(vec![SKILL_APP_ID.to_string()]),
        );
        harness
            .store
            .put("conv-1", relay_record("conv-original"))
            .await
            .expect("seed relay record");

        let response = harness
            .router
            .oneshot(post_activity_request(
                "/api/skills/v3/conversations/conv-1/activities/act-5",
                Some(&unsigned_jwt(SKILL_APP_ID)),
                &oauth_card_activity("conv-1"),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(harness.transport.posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_exchange_still_delivers_the_card() {
        let harness = harness(
            TokenExchangeOutcome::Failed("provider down".to_string()),
            CallerPolicy::new(vec![SKILL_APP_ID.to_string()]),
        );
        harness
            .store
            .put("conv-1", relay_record("conv-original"))
            .await
            .expect("seed relay record");

        let response = harness
            .router
            .oneshot(post_activity_request(
                "/api/skills/v3/conversations/conv-1/activities",
                Some(&unsigned_jwt(SKILL_APP_ID)),
                &oauth_card_activity("conv-1"),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(harness.transport.posts.load(Ordering::SeqCst), 0);
        assert_eq!(harness.sink.delivered.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn malformed_card_is_a_bad_request() {
        let harness = harness(
            TokenExchangeOutcome::NotExchangeable,
            CallerPolicy::new(vec![SKILL_APP_ID.to_string()]),
        );
        let mut activity = Activity::new(ActivityType::Message);
        activity.recipient = Some(ChannelAccount::new("user-1"));
        activity.attachments.push(Attachment {
            content_type: OAUTH_CARD_CONTENT_TYPE.to_string(),
            content: serde_json::json!(42),
        });

        let response = harness
            .router
            .oneshot(post_activity_request(
                "/api/skills/v3/conversations/conv-1/activities",
                Some(&unsigned_jwt(SKILL_APP_ID)),
                &activity,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert_eq!(body["status"], serde_json::json!("error"));
    }
}
