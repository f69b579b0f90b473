//! Persistence port definitions.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::domain::{ApiToken, Conversation, ConversationId};
use crate::error::StoreError;

/// Port for conversation persistence: one durable record per conversation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Write the full record, replacing any previous version.
    async fn save(&self, record: &Conversation) -> Result<(), StoreError>;

    /// Remove the record. Removing an absent record is not an error.
    async fn delete(&self, id: ConversationId) -> Result<(), StoreError>;

    /// Load every live record. Expired records are purged, not returned.
    async fn load_all(&self) -> Result<Vec<Conversation>, StoreError>;
}

/// In-memory-only store for tests and ephemeral deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConversationStore;

#[async_trait]
impl ConversationStore for NoopConversationStore {
    async fn save(&self, _record: &Conversation) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, _id: ConversationId) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Conversation>, StoreError> {
        Ok(Vec::new())
    }
}

/// Durable token state as loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct TokenSnapshot {
    pub approved: HashMap<String, ApiToken>,
    pub pending: HashSet<String>,
}

/// Port for token persistence.
///
/// Approved tokens are the valuable record; pending requests are best
/// effort (a caller that loses its pending slot simply re-requests).
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Load durable state, falling back to any secondary copy the
    /// implementation keeps.
    async fn load(&self) -> Result<TokenSnapshot, StoreError>;

    /// Persist the approved caller→token map.
    async fn save_approved(&self, approved: &HashMap<String, ApiToken>) -> Result<(), StoreError>;

    /// Persist the pending caller set.
    async fn save_pending(&self, pending: &HashSet<String>) -> Result<(), StoreError>;
}

/// Token repository that persists nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTokenRepository;

#[async_trait]
impl TokenRepository for NoopTokenRepository {
    async fn load(&self) -> Result<TokenSnapshot, StoreError> {
        Ok(TokenSnapshot::default())
    }

    async fn save_approved(&self, _approved: &HashMap<String, ApiToken>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_pending(&self, _pending: &HashSet<String>) -> Result<(), StoreError> {
        Ok(())
    }
}
