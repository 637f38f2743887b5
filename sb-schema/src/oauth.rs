//! OAuth card attachments and the token-exchange invoke shape.

use crate::error::{Result, SchemaError};
use crate::types::{Activity, ActivityType};
use serde::{Deserialize, Serialize};

/// Attachment content type marking an OAuth sign-in card.
pub const OAUTH_CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.oauth";

/// Invoke activity name used to hand an exchanged token to a skill.
pub const TOKEN_EXCHANGE_OPERATION: &str = "signin/tokenExchange";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_exchange_resource: Option<TokenExchangeResource>,
}

impl OAuthCard {
    /// The exchange uri, if the card carries a non-empty one. A card without
    /// it is a plain sign-in prompt and is never intercepted.
    pub fn exchangeable_uri(&self) -> Option<&str> {
        let uri = self.token_exchange_resource.as_ref()?.uri.as_deref()?;
        let uri = uri.trim();
        if uri.is_empty() { None } else { Some(uri) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenExchangeResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenExchangeInvokeValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
}

/// Extract the OAuth card from an outbound activity, if one is attached.
///
/// `Ok(None)` means the activity carries no OAuth card attachment; a card
/// attachment whose content does not parse as a card is the one fatal error
/// in the relay path and is surfaced to the calling host.
pub fn oauth_card_from_activity(activity: &Activity) -> Result<Option<OAuthCard>> {
    let Some(attachment) = activity
        .attachments
        .iter()
        .find(|a| a.content_type == OAUTH_CARD_CONTENT_TYPE)
    else {
        return Ok(None);
    };

    let card: OAuthCard = serde_json::from_value(attachment.content.clone())
        .map_err(|e| SchemaError::MalformedOAuthCard(e.to_string()))?;
    Ok(Some(card))
}

/// Build the synthetic `signin/tokenExchange` invoke for a skill.
///
/// The conversation on the result is still the incoming activity's; the
/// interceptor rewrites it from the relay record before posting.
pub fn build_token_exchange_invoke(
    incoming: &Activity,
    resource_id: Option<String>,
    token: String,
    connection_name: Option<String>,
) -> Activity {
    let mut invoke = incoming.create_reply();
    invoke.activity_type = ActivityType::Invoke;
    invoke.name = Some(TOKEN_EXCHANGE_OPERATION.to_string());
    invoke.value = serde_json::to_value(TokenExchangeInvokeValue {
        id: resource_id,
        token,
        connection_name,
    })
    .ok();
    invoke
}
