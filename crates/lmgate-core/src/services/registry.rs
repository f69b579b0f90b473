//! The conversation registry: ownership, TTL, and eviction.
//!
//! The registry owns every live conversation. Expired entries are never
//! observable through `lookup`/`peek`; they are evicted on first contact or
//! by the periodic sweeper, whichever comes first. Removing a conversation
//! for any reason cascades into the engine (dropping the active binding if
//! it matches) and the store (deleting the on-disk record).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{ApiToken, Conversation, ConversationHandle, ConversationId, SamplingParams, now_ms};
use crate::error::RegistryError;
use crate::events::{EventEmitter, GatewayEvent};
use crate::ports::{ConversationStore, EngineRuntime};

/// Why a conversation is leaving the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemovalReason {
    Closed,
    Expired,
}

/// Registry of live conversations.
pub struct ConversationRegistry {
    entries: RwLock<HashMap<ConversationId, Arc<ConversationHandle>>>,
    store: Arc<dyn ConversationStore>,
    engine: Arc<dyn EngineRuntime>,
    events: Arc<dyn EventEmitter>,
    default_ttl_ms: u64,
    default_sampling: SamplingParams,
    sweep_interval: Duration,
}

impl ConversationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        engine: Arc<dyn EngineRuntime>,
        events: Arc<dyn EventEmitter>,
        default_ttl_ms: u64,
        default_sampling: SamplingParams,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
            engine,
            events,
            default_ttl_ms,
            default_sampling,
            sweep_interval,
        }
    }

    /// Rehydrate live conversations from the store. Returns how many were
    /// loaded. Called once at startup, before serving.
    pub async fn load_persisted(&self) -> usize {
        let records = match self.store.load_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted conversations");
                return 0;
            }
        };

        let mut entries = self.entries.write().await;
        let loaded = records.len();
        for record in records {
            let handle = Arc::new(ConversationHandle::from_record(record));
            entries.insert(handle.id, handle);
        }
        if loaded > 0 {
            info!(loaded, "Rehydrated conversations from disk");
        }
        loaded
    }

    /// Create a conversation owned by `owner_token`. A non-positive
    /// `ttl_ms` falls back to the registry default.
    pub async fn create(
        &self,
        owner_token: ApiToken,
        system_instruction: Option<String>,
        ttl_ms: i64,
    ) -> Arc<ConversationHandle> {
        let effective = if ttl_ms <= 0 {
            self.default_ttl_ms as i64
        } else {
            ttl_ms
        };
        let mut record = Conversation::new(owner_token, system_instruction, effective);
        record.sampling = self.default_sampling;
        let handle = Arc::new(ConversationHandle::from_record(record));

        self.entries.write().await.insert(handle.id, handle.clone());

        let snapshot = handle.snapshot().await;
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(conversation_id = %handle.id, error = %e, "Failed to persist new conversation");
        }
        debug!(conversation_id = %handle.id, ttl_ms = handle.ttl_ms, "Conversation created");
        handle
    }

    /// Authenticated, touching lookup: the caller intends to use the
    /// conversation, so a hit renews its TTL window and persists it.
    pub async fn lookup(
        &self,
        id: ConversationId,
        presenting_token: ApiToken,
    ) -> Result<Arc<ConversationHandle>, RegistryError> {
        let handle = self.resolve(id, presenting_token).await?;

        handle.touch(now_ms());
        let snapshot = handle.snapshot().await;
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(conversation_id = %id, error = %e, "Failed to persist touched conversation");
        }
        Ok(handle)
    }

    /// Authenticated, non-touching lookup: inspection only, the TTL window
    /// is left alone.
    pub async fn peek(
        &self,
        id: ConversationId,
        presenting_token: ApiToken,
    ) -> Result<Arc<ConversationHandle>, RegistryError> {
        self.resolve(id, presenting_token).await
    }

    /// Shared auth + expiry path for `lookup` and `peek`.
    async fn resolve(
        &self,
        id: ConversationId,
        presenting_token: ApiToken,
    ) -> Result<Arc<ConversationHandle>, RegistryError> {
        let handle = self
            .entries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        // Ownership first: a foreign caller must not advance the lifetime,
        // and must not learn whether the conversation has expired.
        if handle.owner_token != presenting_token {
            return Err(RegistryError::Unauthorized(id.to_string()));
        }

        if handle.is_expired(now_ms()) {
            self.remove(id, RemovalReason::Expired).await;
            return Err(RegistryError::Expired(id.to_string()));
        }

        Ok(handle)
    }

    /// Authenticated close. Removes the conversation, drops any active
    /// engine binding, and deletes the on-disk record.
    pub async fn close(
        &self,
        id: ConversationId,
        presenting_token: ApiToken,
    ) -> Result<(), RegistryError> {
        self.resolve(id, presenting_token).await?;
        self.remove(id, RemovalReason::Closed).await;
        Ok(())
    }

    /// Bulk close during revocation. Returns how many were closed.
    pub async fn close_all_for(&self, owner_token: ApiToken) -> usize {
        let owned: Vec<ConversationId> = self
            .entries
            .read()
            .await
            .values()
            .filter(|h| h.owner_token == owner_token)
            .map(|h| h.id)
            .collect();

        let mut closed = 0;
        for id in owned {
            if self.remove(id, RemovalReason::Closed).await {
                closed += 1;
            }
        }
        if closed > 0 {
            info!(closed, "Closed conversations for revoked token");
        }
        closed
    }

    /// One sweeper pass: evict every expired conversation. Returns the
    /// eviction count.
    pub async fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let expired: Vec<ConversationId> = self
            .entries
            .read()
            .await
            .values()
            .filter(|h| h.is_expired(now))
            .map(|h| h.id)
            .collect();

        let mut evicted = 0;
        for id in expired {
            if self.remove(id, RemovalReason::Expired).await {
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, "Sweeper evicted expired conversations");
        }
        evicted
    }

    /// Spawn the long-running sweeper task.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                registry.sweep_expired().await;
            }
        })
    }

    /// Remove an entry and run the full cascade. Returns whether the entry
    /// was present. The map lock is released before the cascade so a slow
    /// engine teardown never blocks other registry readers.
    async fn remove(&self, id: ConversationId, reason: RemovalReason) -> bool {
        let removed = self.entries.write().await.remove(&id);
        let Some(handle) = removed else {
            return false;
        };

        self.engine.close_conversation_if_active(id).await;
        if let Err(e) = self.store.delete(id).await {
            warn!(conversation_id = %id, error = %e, "Failed to delete conversation record");
        }

        match reason {
            RemovalReason::Closed => {
                debug!(conversation_id = %handle.id, "Conversation closed");
                self.events.emit(GatewayEvent::ConversationClosed {
                    conversation_id: id.to_string(),
                });
            }
            RemovalReason::Expired => {
                debug!(conversation_id = %handle.id, "Conversation expired");
                self.events.emit(GatewayEvent::ConversationExpired {
                    conversation_id: id.to_string(),
                });
            }
        }
        true
    }

    /// Number of live conversations.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether a conversation is currently registered.
    pub async fn contains(&self, id: ConversationId) -> bool {
        self.entries.read().await.contains_key(&id)
    }
}
