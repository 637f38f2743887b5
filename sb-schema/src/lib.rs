mod error;
mod oauth;
mod types;

pub use error::{Result, SchemaError};
pub use oauth::{
    OAUTH_CARD_CONTENT_TYPE, OAuthCard, TOKEN_EXCHANGE_OPERATION, TokenExchangeInvokeValue,
    TokenExchangeResource, build_token_exchange_invoke, oauth_card_from_activity,
};
pub use types::{
    Activity, ActivityId, ActivityType, AppId, Attachment, ChannelAccount, ConversationAccount,
    ConversationId, ConversationReference, ResourceResponse,
};
