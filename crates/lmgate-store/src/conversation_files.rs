//! File-per-conversation persistence.
//!
//! Each conversation lives in `<dir>/<id>.json`, rewritten whole on every
//! update. Writes for the same conversation are serialized behind a
//! per-conversation lock so concurrent updates cannot tear a file; writes
//! for different conversations proceed independently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use lmgate_core::domain::{Conversation, ConversationId, now_ms};
use lmgate_core::error::StoreError;
use lmgate_core::ports::ConversationStore;

/// Conversation store over a directory of JSON files.
pub struct ConversationFileStore {
    dir: PathBuf,
    write_locks: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl ConversationFileStore {
    /// Open (and create if needed) the store directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(dir.display().to_string(), e))?;
        Ok(Self {
            dir,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    fn file_path(&self, id: ConversationId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn lock_for(&self, id: ConversationId) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks.entry(id).or_default().clone()
    }

    async fn drop_lock(&self, id: ConversationId) {
        self.write_locks.lock().await.remove(&id);
    }
}

#[async_trait]
impl ConversationStore for ConversationFileStore {
    async fn save(&self, record: &Conversation) -> Result<(), StoreError> {
        let path = self.file_path(record.id);
        let json = serde_json::to_vec_pretty(record)?;

        let lock = self.lock_for(record.id).await;
        let _guard = lock.lock().await;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StoreError::io(path.display().to_string(), e))?;
        debug!(conversation_id = %record.id, "Conversation persisted");
        Ok(())
    }

    async fn delete(&self, id: ConversationId) -> Result<(), StoreError> {
        let path = self.file_path(id);
        let lock = self.lock_for(id).await;
        {
            let _guard = lock.lock().await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(path.display().to_string(), e)),
            }
        }
        self.drop_lock(id).await;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Conversation>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(self.dir.display().to_string(), e))?;

        let now = now_ms();
        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(self.dir.display().to_string(), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable conversation file");
                    continue;
                }
            };
            let record: Conversation = match serde_json::from_slice(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unparsable conversation file");
                    continue;
                }
            };

            if record.is_expired(now) {
                debug!(conversation_id = %record.id, "Deleting expired conversation file");
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to delete expired conversation file");
                }
                continue;
            }
            records.push(record);
        }
        Ok(records)
    }
}
