//! Token persistence over a small keyed JSON file.
//!
//! The primary file holds the approved caller→token map and the pending
//! caller set under distinct keys. The approved map is additionally
//! mirrored into a flat backup file; on load, a missing or unparsable
//! primary falls back to the backup (losing pending requests, which is
//! acceptable — the callers will simply re-request).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use lmgate_core::domain::ApiToken;
use lmgate_core::error::StoreError;
use lmgate_core::ports::{TokenRepository, TokenSnapshot};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    approved_tokens: HashMap<String, ApiToken>,
    #[serde(default)]
    pending_requests: HashSet<String>,
}

/// Token repository over a primary KV file plus a backup mirror.
pub struct FileTokenRepository {
    primary: PathBuf,
    backup: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenRepository {
    /// Create a repository over the given file locations.
    #[must_use]
    pub fn new(primary: impl Into<PathBuf>, backup: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            backup: backup.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_primary(&self) -> Option<TokenFile> {
        let raw = tokio::fs::read(&self.primary).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %self.primary.display(), error = %e, "Token store unparsable");
                None
            }
        }
    }

    async fn read_backup(&self) -> Option<HashMap<String, ApiToken>> {
        let raw = tokio::fs::read(&self.backup).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(approved) => Some(approved),
            Err(e) => {
                warn!(path = %self.backup.display(), error = %e, "Token backup unparsable");
                None
            }
        }
    }

    async fn write_primary(&self, file: &TokenFile) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(file)?;
        tokio::fs::write(&self.primary, json)
            .await
            .map_err(|e| StoreError::io(self.primary.display().to_string(), e))
    }
}

#[async_trait]
impl TokenRepository for FileTokenRepository {
    async fn load(&self) -> Result<TokenSnapshot, StoreError> {
        // An empty primary also falls through to the backup: both files go
        // empty together on a wipe, so this cannot resurrect revoked tokens.
        if let Some(file) = self.read_primary().await {
            if !file.approved_tokens.is_empty() {
                return Ok(TokenSnapshot {
                    approved: file.approved_tokens,
                    pending: file.pending_requests,
                });
            }
            if let Some(approved) = self.read_backup().await {
                if !approved.is_empty() {
                    debug!("Recovered approved tokens from backup");
                    return Ok(TokenSnapshot {
                        approved,
                        pending: file.pending_requests,
                    });
                }
            }
            return Ok(TokenSnapshot {
                approved: file.approved_tokens,
                pending: file.pending_requests,
            });
        }

        if let Some(approved) = self.read_backup().await {
            debug!("Recovered approved tokens from backup");
            return Ok(TokenSnapshot {
                approved,
                pending: HashSet::new(),
            });
        }

        Ok(TokenSnapshot::default())
    }

    async fn save_approved(&self, approved: &HashMap<String, ApiToken>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut file = self.read_primary().await.unwrap_or_default();
        file.approved_tokens = approved.clone();
        self.write_primary(&file).await?;

        // Mirror the valuable half into the backup; a failed mirror is
        // logged, not fatal.
        let json = serde_json::to_vec_pretty(approved)?;
        if let Err(e) = tokio::fs::write(&self.backup, json).await {
            warn!(path = %self.backup.display(), error = %e, "Failed to write token backup");
        }
        Ok(())
    }

    async fn save_pending(&self, pending: &HashSet<String>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut file = self.read_primary().await.unwrap_or_default();
        file.pending_requests = pending.clone();
        self.write_primary(&file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(dir: &std::path::Path) -> FileTokenRepository {
        FileTokenRepository::new(dir.join("auth_tokens.json"), dir.join("backup.json"))
    }

    fn approved(entries: &[(&str, ApiToken)]) -> HashMap<String, ApiToken> {
        entries
            .iter()
            .map(|(caller, token)| ((*caller).to_string(), *token))
            .collect()
    }

    #[tokio::test]
    async fn empty_load_yields_empty_snapshot() {
        let temp = tempfile::tempdir().unwrap();
        let snapshot = repo(temp.path()).load().await.unwrap();
        assert!(snapshot.approved.is_empty());
        assert!(snapshot.pending.is_empty());
    }

    #[tokio::test]
    async fn approved_and_pending_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let repo = repo(temp.path());
        let token = ApiToken::generate();

        repo.save_approved(&approved(&[("com.x.y", token)]))
            .await
            .unwrap();
        repo.save_pending(&HashSet::from(["com.a.b".to_string()]))
            .await
            .unwrap();

        let snapshot = repo.load().await.unwrap();
        assert_eq!(snapshot.approved.get("com.x.y"), Some(&token));
        assert!(snapshot.pending.contains("com.a.b"));
    }

    #[tokio::test]
    async fn pending_save_does_not_clobber_approved() {
        let temp = tempfile::tempdir().unwrap();
        let repo = repo(temp.path());
        let token = ApiToken::generate();

        repo.save_approved(&approved(&[("com.x.y", token)]))
            .await
            .unwrap();
        repo.save_pending(&HashSet::new()).await.unwrap();

        let snapshot = repo.load().await.unwrap();
        assert_eq!(snapshot.approved.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_primary_falls_back_to_backup() {
        let temp = tempfile::tempdir().unwrap();
        let repo = repo(temp.path());
        let token = ApiToken::generate();

        repo.save_approved(&approved(&[("com.x.y", token)]))
            .await
            .unwrap();
        tokio::fs::write(temp.path().join("auth_tokens.json"), b"{broken")
            .await
            .unwrap();

        let snapshot = repo.load().await.unwrap();
        assert_eq!(snapshot.approved.get("com.x.y"), Some(&token));
        // Pending requests are not mirrored; losing them is acceptable.
        assert!(snapshot.pending.is_empty());
    }
}
