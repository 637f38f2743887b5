use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of one exchange attempt. Drives the interceptor's branch: only
/// `Exchanged` proceeds to the relay; everything else degrades to showing
/// the sign-in card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenExchangeOutcome {
    Exchanged(String),
    NotExchangeable,
    Failed(String),
}

/// Exchanges a host-held credential into a skill-scoped token against an
/// identity provider. Infallible by contract: provider-side failures map to
/// `Failed`, never to an error the caller must handle.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(
        &self,
        user_id: &str,
        connection_name: &str,
        channel_id: &str,
        resource_uri: &str,
        cancel: &CancellationToken,
    ) -> TokenExchangeOutcome;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeRequest<'a> {
    user_id: &'a str,
    connection_name: &'a str,
    channel_id: &'a str,
    uri: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Token exchange against an HTTP identity-provider endpoint.
#[derive(Clone)]
pub struct HttpTokenExchanger {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpTokenExchanger {
    pub fn new(endpoint: Url, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoint })
    }

    async fn exchange_inner(
        &self,
        request: &ExchangeRequest<'_>,
    ) -> Result<TokenExchangeOutcome, String> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("token endpoint returned {status}"));
        }

        let body: ExchangeResponse = response.json().await.map_err(|e| e.to_string())?;
        match body.token {
            Some(token) if !token.trim().is_empty() => Ok(TokenExchangeOutcome::Exchanged(token)),
            _ => Ok(TokenExchangeOutcome::NotExchangeable),
        }
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    #[tracing::instrument(level = "debug", skip_all, fields(connection_name, channel_id))]
    async fn exchange(
        &self,
        user_id: &str,
        connection_name: &str,
        channel_id: &str,
        resource_uri: &str,
        cancel: &CancellationToken,
    ) -> TokenExchangeOutcome {
        let request = ExchangeRequest {
            user_id,
            connection_name,
            channel_id,
            uri: resource_uri,
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return TokenExchangeOutcome::Failed("exchange cancelled".to_string());
            }
            result = self.exchange_inner(&request) => result,
        };

        match result {
            Ok(outcome) => outcome,
            Err(cause) => {
                tracing::warn!(%cause, "token exchange request failed");
                TokenExchangeOutcome::Failed(cause)
            }
        }
    }
}
