use crate::identity::ClaimsIdentity;
use crate::registry::{SkillDescriptor, SkillRegistry};
use crate::store::ConversationStore;
use crate::token::{TokenExchangeOutcome, TokenExchanger};
use crate::transport::SkillTransport;
use reqwest::Url;
use sb_schema::{
    Activity, ActivityId, ConversationId, OAuthCard, ResourceResponse, SchemaError,
    build_token_exchange_invoke, oauth_card_from_activity,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Host-level settings the interceptor needs, passed at construction rather
/// than read from ambient state.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// App id of the host service performing exchanges.
    pub bot_id: String,
    /// Auth connection used for every exchange.
    pub connection_name: String,
    /// Endpoint skills use to call back into the host.
    pub host_endpoint: Url,
}

/// What the caller should do with the activity it handed in.
#[derive(Debug)]
pub enum InterceptOutcome {
    /// The card was relayed to the skill; deliver nothing and return the
    /// synthetic acknowledgement.
    Intercepted(ResourceResponse),
    /// Not intercepted; deliver the activity through the normal path.
    PassThrough(Activity),
}

/// Inspects outbound activities for OAuth cards whose token can be silently
/// exchanged on the user's behalf, and on success notifies the originating
/// skill out-of-band instead of letting the card reach the user.
///
/// Stateless across calls; pass-through is the default on every ambiguous
/// branch. The only fatal error is a card attachment that fails to parse.
pub struct TokenExchangeInterceptor {
    settings: RelaySettings,
    registry: Arc<SkillRegistry>,
    store: Arc<dyn ConversationStore>,
    exchanger: Arc<dyn TokenExchanger>,
    transport: Arc<dyn SkillTransport>,
}

impl TokenExchangeInterceptor {
    pub fn new(
        settings: RelaySettings,
        registry: Arc<SkillRegistry>,
        store: Arc<dyn ConversationStore>,
        exchanger: Arc<dyn TokenExchanger>,
        transport: Arc<dyn SkillTransport>,
    ) -> Self {
        Self {
            settings,
            registry,
            store,
            exchanger,
            transport,
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(conversation_id = %conversation_id))]
    pub async fn on_send_to_conversation(
        &self,
        identity: &ClaimsIdentity,
        conversation_id: &ConversationId,
        activity: Activity,
        cancel: &CancellationToken,
    ) -> Result<InterceptOutcome, SchemaError> {
        if self
            .intercept_oauth_card(identity, conversation_id, &activity, cancel)
            .await?
        {
            return Ok(InterceptOutcome::Intercepted(ResourceResponse::synthetic()));
        }
        Ok(InterceptOutcome::PassThrough(activity))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(conversation_id = %conversation_id, activity_id = %activity_id))]
    pub async fn on_reply_to_activity(
        &self,
        identity: &ClaimsIdentity,
        conversation_id: &ConversationId,
        activity_id: &ActivityId,
        activity: Activity,
        cancel: &CancellationToken,
    ) -> Result<InterceptOutcome, SchemaError> {
        if self
            .intercept_oauth_card(identity, conversation_id, &activity, cancel)
            .await?
        {
            return Ok(InterceptOutcome::Intercepted(ResourceResponse::synthetic()));
        }
        Ok(InterceptOutcome::PassThrough(activity))
    }

    /// Scan -> Lookup -> Exchange -> Relay. `false` means pass-through.
    async fn intercept_oauth_card(
        &self,
        identity: &ClaimsIdentity,
        conversation_id: &ConversationId,
        activity: &Activity,
        cancel: &CancellationToken,
    ) -> Result<bool, SchemaError> {
        let Some(card) = oauth_card_from_activity(activity)? else {
            return Ok(false);
        };

        let Some(caller_app_id) = identity.app_id() else {
            tracing::debug!("caller has no app id claim; not intercepting");
            return Ok(false);
        };
        let Some(skill) = self.registry.lookup_by_app_id(&caller_app_id) else {
            tracing::debug!(caller_app_id = %caller_app_id, "caller is not a registered skill; not intercepting");
            return Ok(false);
        };

        let Some(resource_uri) = card.exchangeable_uri() else {
            tracing::debug!(skill_id = %skill.id, "oauth card has no exchange resource; showing sign-in card");
            return Ok(false);
        };

        let Some(user_id) = activity.recipient.as_ref().map(|r| r.id.as_str()) else {
            tracing::warn!(skill_id = %skill.id, "oauth card activity has no recipient; showing sign-in card");
            return Ok(false);
        };
        let channel_id = activity.channel_id.as_deref().unwrap_or_default();

        match self
            .exchanger
            .exchange(
                user_id,
                &self.settings.connection_name,
                channel_id,
                resource_uri,
                cancel,
            )
            .await
        {
            TokenExchangeOutcome::Exchanged(token) => {
                Ok(self
                    .relay_invoke_to_skill(conversation_id, activity, &card, token, skill, cancel)
                    .await)
            }
            TokenExchangeOutcome::NotExchangeable => {
                tracing::debug!(skill_id = %skill.id, "token not exchangeable; showing sign-in card");
                Ok(false)
            }
            TokenExchangeOutcome::Failed(cause) => {
                tracing::warn!(skill_id = %skill.id, %cause, "unable to exchange token; showing sign-in card");
                Ok(false)
            }
        }
    }

    /// Push the exchanged token back to the skill as a signin/tokenExchange
    /// invoke. The invoke is addressed to the relay record's original
    /// conversation, never the live call's, so it lands in the right skill
    /// session.
    async fn relay_invoke_to_skill(
        &self,
        conversation_id: &ConversationId,
        incoming: &Activity,
        card: &OAuthCard,
        token: String,
        skill: &SkillDescriptor,
        cancel: &CancellationToken,
    ) -> bool {
        let local_id = incoming
            .conversation_id()
            .unwrap_or(conversation_id)
            .clone();

        let record = match self.store.get(local_id.as_str()).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(conversation_id = %local_id, "no relay record for conversation; showing sign-in card");
                return false;
            }
            Err(e) => {
                tracing::warn!(conversation_id = %local_id, error = %e, "relay record lookup failed; showing sign-in card");
                return false;
            }
        };

        let resource_id = card
            .token_exchange_resource
            .as_ref()
            .and_then(|r| r.id.clone());
        let mut invoke =
            build_token_exchange_invoke(incoming, resource_id, token, card.connection_name.clone());
        invoke.conversation = Some(record.conversation_reference.conversation.clone());

        match self
            .transport
            .post_activity(
                &self.settings.bot_id,
                &skill.app_id,
                &skill.endpoint,
                &self.settings.host_endpoint,
                &local_id,
                &invoke,
                cancel,
            )
            .await
        {
            Ok(status) if (200..=299).contains(&status) => true,
            Ok(status) => {
                tracing::warn!(skill_id = %skill.id, status, "token exchange invoke rejected by skill; showing sign-in card");
                false
            }
            Err(e) => {
                tracing::warn!(skill_id = %skill.id, error = %e, "token exchange invoke failed to send; showing sign-in card");
                false
            }
        }
    }
}
