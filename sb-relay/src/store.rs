use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use sb_schema::ConversationReference;

/// Routing state for one relayed conversation: where the activity originally
/// came from, so a synthetic invoke can be routed back to the right skill
/// session. Created when the host first relays the conversation, deleted by
/// the owner when the conversation ends; never mutated in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayRecord {
    pub conversation_reference: ConversationReference,
    pub oauth_scope: Option<String>,
}

/// Key-value persistence for relay records, keyed by the locally generated
/// conversation id. Backed in-memory here; a durable implementation can be
/// supplied by the surrounding host as long as it is read-after-write
/// consistent per key.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, conversation_id: &str) -> Result<Option<RelayRecord>>;
    async fn put(&self, conversation_id: &str, record: RelayRecord) -> Result<()>;
    async fn delete(&self, conversation_id: &str) -> Result<bool>;
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    records: DashMap<String, RelayRecord>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, conversation_id: &str) -> Result<Option<RelayRecord>> {
        Ok(self.records.get(conversation_id).map(|r| r.value().clone()))
    }

    async fn put(&self, conversation_id: &str, record: RelayRecord) -> Result<()> {
        self.records.insert(conversation_id.to_string(), record);
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> Result<bool> {
        Ok(self.records.remove(conversation_id).is_some())
    }
}
