//! Normal delivery path for activities the interceptor passed through.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;
use sb_schema::{Activity, ConversationId, ResourceResponse};
use std::time::Duration;

/// Where pass-through activities go. The relay never delivers to users
/// itself; the sink forwards to whatever connector owns the conversation.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn deliver(
        &self,
        conversation_id: &ConversationId,
        activity: &Activity,
    ) -> Result<ResourceResponse>;
}

/// Forwards activities to the conversation's connector service url.
#[derive(Clone)]
pub struct ConnectorDelivery {
    http: reqwest::Client,
}

impl ConnectorDelivery {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ActivitySink for ConnectorDelivery {
    #[tracing::instrument(level = "debug", skip_all, fields(conversation_id = %conversation_id))]
    async fn deliver(
        &self,
        conversation_id: &ConversationId,
        activity: &Activity,
    ) -> Result<ResourceResponse> {
        let service_url = activity
            .service_url
            .as_deref()
            .ok_or_else(|| anyhow!("activity has no service url to deliver to"))?;
        let base = service_url.trim_end_matches('/');
        let url = Url::parse(&format!(
            "{base}/v3/conversations/{conversation_id}/activities"
        ))?;

        let response = self.http.post(url).json(activity).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("connector delivery failed: status={status}"));
        }

        // Some connectors answer with an empty body; synthesize an id then.
        match response.json::<ResourceResponse>().await {
            Ok(resource) => Ok(resource),
            Err(_) => Ok(ResourceResponse::synthetic()),
        }
    }
}
