use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchemaError>;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("malformed oauth card payload: {0}")]
    MalformedOAuthCard(String),

    #[error("activity is missing a conversation")]
    MissingConversation,

    #[error("invalid activity payload: {0}")]
    InvalidActivity(String),
}

impl From<serde_json::Error> for SchemaError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidActivity(e.to_string())
    }
}
