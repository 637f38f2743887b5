use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;
use sb_schema::{Activity, AppId, ConversationId};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outbound delivery of a synthetic activity to a skill endpoint.
///
/// Returns the raw status code; the caller decides what counts as success
/// (200..=299). Transport-level failures surface as errors. No retries here:
/// retries, if any, belong to the surrounding host.
#[async_trait]
pub trait SkillTransport: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn post_activity(
        &self,
        bot_id: &str,
        target_app_id: &AppId,
        endpoint: &Url,
        host_endpoint: &Url,
        conversation_id: &ConversationId,
        activity: &Activity,
        cancel: &CancellationToken,
    ) -> Result<u16>;
}

#[derive(Clone)]
pub struct HttpSkillTransport {
    http: reqwest::Client,
}

impl HttpSkillTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    fn activities_url(endpoint: &Url, conversation_id: &ConversationId) -> Result<Url> {
        let base = endpoint.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!(
            "{base}/v3/conversations/{conversation_id}/activities"
        ))?)
    }
}

#[async_trait]
impl SkillTransport for HttpSkillTransport {
    #[tracing::instrument(level = "debug", skip_all, fields(target_app_id = %target_app_id, conversation_id = %conversation_id))]
    async fn post_activity(
        &self,
        bot_id: &str,
        target_app_id: &AppId,
        endpoint: &Url,
        host_endpoint: &Url,
        conversation_id: &ConversationId,
        activity: &Activity,
        cancel: &CancellationToken,
    ) -> Result<u16> {
        let url = Self::activities_url(endpoint, conversation_id)?;
        let request = self
            .http
            .post(url)
            .header("x-bridge-bot-id", bot_id)
            .header("x-bridge-host-endpoint", host_endpoint.as_str())
            .header("x-bridge-recipient-app-id", target_app_id.as_str())
            .json(activity);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("relay post cancelled")),
            response = request.send() => response?,
        };
        Ok(response.status().as_u16())
    }
}
