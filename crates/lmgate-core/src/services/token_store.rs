//! Caller authentication: pending approvals and approved bearer tokens.
//!
//! In-memory state is authoritative for the process lifetime; persistence
//! through the [`TokenRepository`] port is best effort and failures are
//! logged, never surfaced. `validate` reads a dedicated set behind its own
//! read-write lock so the request hot path never contends with mutations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{info, warn};

use crate::domain::{ApiToken, TokenGrant};
use crate::ports::{TokenRepository, TokenSnapshot};

#[derive(Debug, Default)]
struct TokenTable {
    by_caller: HashMap<String, ApiToken>,
    by_token: HashMap<ApiToken, String>,
    pending: HashSet<String>,
}

/// The token store.
pub struct TokenStore {
    table: Mutex<TokenTable>,
    validation: RwLock<HashSet<ApiToken>>,
    repo: Arc<dyn TokenRepository>,
    /// Serializes persistence writes so later snapshots never lose to
    /// earlier in-flight ones.
    write_lock: tokio::sync::Mutex<()>,
}

impl TokenStore {
    /// Create an empty store over a repository.
    #[must_use]
    pub fn new(repo: Arc<dyn TokenRepository>) -> Self {
        Self {
            table: Mutex::new(TokenTable::default()),
            validation: RwLock::new(HashSet::new()),
            repo,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load durable state. Called once at startup, before serving.
    pub async fn load(&self) {
        let snapshot = match self.repo.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Failed to load token state, starting empty");
                TokenSnapshot::default()
            }
        };

        let approved = snapshot.approved.len();
        let tokens: HashSet<ApiToken> = snapshot.approved.values().copied().collect();
        if let Ok(mut table) = self.table.lock() {
            table.by_token = snapshot
                .approved
                .iter()
                .map(|(caller, token)| (*token, caller.clone()))
                .collect();
            table.by_caller = snapshot.approved;
            table.pending = snapshot.pending;
        }
        if let Ok(mut set) = self.validation.write() {
            *set = tokens;
        }
        info!(approved, "Token store loaded");
    }

    /// A caller asks for a token. Known callers get theirs back; unknown
    /// ones are queued for approval. Idempotent while pending.
    pub async fn request(&self, caller_id: &str) -> TokenGrant {
        let (grant, pending_changed) = {
            let Ok(mut table) = self.table.lock() else {
                return TokenGrant::Pending;
            };
            if let Some(token) = table.by_caller.get(caller_id) {
                (TokenGrant::Approved(*token), false)
            } else {
                let inserted = table.pending.insert(caller_id.to_string());
                (TokenGrant::Pending, inserted)
            }
        };

        if pending_changed {
            info!(caller_id, "Caller queued for token approval");
            self.persist_pending().await;
        }
        grant
    }

    /// Approve a pending caller, minting a fresh token. Returns the
    /// caller's existing token if it was already approved, `None` if the
    /// caller is unknown.
    pub async fn approve(&self, caller_id: &str) -> Option<ApiToken> {
        let (token, minted) = {
            let Ok(mut table) = self.table.lock() else {
                return None;
            };
            if let Some(existing) = table.by_caller.get(caller_id) {
                (Some(*existing), false)
            } else if table.pending.remove(caller_id) {
                let token = ApiToken::generate();
                table.by_caller.insert(caller_id.to_string(), token);
                table.by_token.insert(token, caller_id.to_string());
                (Some(token), true)
            } else {
                (None, false)
            }
        };

        if minted {
            if let (Some(token), Ok(mut set)) = (token, self.validation.write()) {
                set.insert(token);
            }
            info!(caller_id, "Token approved");
            self.persist_approved().await;
            self.persist_pending().await;
        }
        token
    }

    /// Drop a pending request. No-op if the caller is not pending.
    pub async fn deny(&self, caller_id: &str) {
        let removed = self
            .table
            .lock()
            .map(|mut table| table.pending.remove(caller_id))
            .unwrap_or(false);
        if removed {
            info!(caller_id, "Token request denied");
            self.persist_pending().await;
        }
    }

    /// Remove a token. Returns whether it was found. Does not cascade into
    /// conversations; the dispatcher owns that.
    pub async fn revoke(&self, token: &ApiToken) -> Option<String> {
        let caller = {
            let Ok(mut table) = self.table.lock() else {
                return None;
            };
            let caller = table.by_token.remove(token)?;
            table.by_caller.remove(&caller);
            Some(caller)
        };

        if caller.is_some() {
            if let Ok(mut set) = self.validation.write() {
                set.remove(token);
            }
            self.persist_approved().await;
        }
        caller
    }

    /// O(1) hot-path check that a token is currently approved.
    #[must_use]
    pub fn validate(&self, token: &ApiToken) -> bool {
        self.validation
            .read()
            .map(|set| set.contains(token))
            .unwrap_or(false)
    }

    /// Callers currently awaiting approval.
    #[must_use]
    pub fn pending_callers(&self) -> Vec<String> {
        self.table
            .lock()
            .map(|table| table.pending.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Caller bound to an approved token, if any.
    #[must_use]
    pub fn caller_for(&self, token: &ApiToken) -> Option<String> {
        self.table
            .lock()
            .ok()
            .and_then(|table| table.by_token.get(token).cloned())
    }

    /// Number of approved tokens.
    #[must_use]
    pub fn approved_count(&self) -> usize {
        self.table.lock().map(|t| t.by_token.len()).unwrap_or(0)
    }

    /// Full wipe: every token revoked, every pending request dropped.
    /// Returns the revoked tokens so the caller can cascade.
    pub async fn wipe(&self) -> Vec<ApiToken> {
        let revoked = {
            let Ok(mut table) = self.table.lock() else {
                return Vec::new();
            };
            let revoked: Vec<ApiToken> = table.by_token.keys().copied().collect();
            table.by_caller.clear();
            table.by_token.clear();
            table.pending.clear();
            revoked
        };

        if let Ok(mut set) = self.validation.write() {
            set.clear();
        }
        info!(revoked = revoked.len(), "Token store wiped");
        self.persist_approved().await;
        self.persist_pending().await;
        revoked
    }

    async fn persist_approved(&self) {
        let _guard = self.write_lock.lock().await;
        let approved = self
            .table
            .lock()
            .map(|t| t.by_caller.clone())
            .unwrap_or_default();
        if let Err(e) = self.repo.save_approved(&approved).await {
            warn!(error = %e, "Failed to persist approved tokens");
        }
    }

    async fn persist_pending(&self) {
        let _guard = self.write_lock.lock().await;
        let pending = self
            .table
            .lock()
            .map(|t| t.pending.clone())
            .unwrap_or_default();
        if let Err(e) = self.repo.save_pending(&pending).await {
            warn!(error = %e, "Failed to persist pending requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::NoopTokenRepository;

    fn store() -> TokenStore {
        TokenStore::new(Arc::new(NoopTokenRepository))
    }

    #[tokio::test]
    async fn unknown_caller_goes_pending() {
        let store = store();
        assert_eq!(store.request("com.x.y").await, TokenGrant::Pending);
        // Repeat requests stay pending without duplicating.
        assert_eq!(store.request("com.x.y").await, TokenGrant::Pending);
        assert_eq!(store.pending_callers(), vec!["com.x.y".to_string()]);
    }

    #[tokio::test]
    async fn approve_mints_and_request_returns_it() {
        let store = store();
        store.request("com.x.y").await;
        let token = store.approve("com.x.y").await.unwrap();

        assert!(store.validate(&token));
        assert_eq!(store.request("com.x.y").await, TokenGrant::Approved(token));
        assert!(store.pending_callers().is_empty());
    }

    #[tokio::test]
    async fn approve_is_idempotent_for_approved_callers() {
        let store = store();
        store.request("com.x.y").await;
        let first = store.approve("com.x.y").await.unwrap();
        let second = store.approve("com.x.y").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.approved_count(), 1);
    }

    #[tokio::test]
    async fn approve_unknown_caller_returns_none() {
        let store = store();
        assert_eq!(store.approve("never.requested").await, None);
    }

    #[tokio::test]
    async fn deny_removes_pending_only() {
        let store = store();
        store.request("com.x.y").await;
        store.deny("com.x.y").await;
        assert!(store.pending_callers().is_empty());
        // Denied caller can request again.
        assert_eq!(store.request("com.x.y").await, TokenGrant::Pending);
    }

    #[tokio::test]
    async fn revoke_invalidates_atomically() {
        let store = store();
        store.request("com.x.y").await;
        let token = store.approve("com.x.y").await.unwrap();

        assert_eq!(store.revoke(&token).await, Some("com.x.y".to_string()));
        assert!(!store.validate(&token));
        assert_eq!(store.revoke(&token).await, None);
    }

    #[tokio::test]
    async fn token_caller_mapping_is_bijective() {
        let store = store();
        for caller in ["a", "b", "c"] {
            store.request(caller).await;
            store.approve(caller).await.unwrap();
        }

        let mut seen = HashSet::new();
        for caller in ["a", "b", "c"] {
            let TokenGrant::Approved(token) = store.request(caller).await else {
                panic!("expected approval");
            };
            assert_eq!(store.caller_for(&token), Some(caller.to_string()));
            assert!(seen.insert(token), "tokens must be distinct");
        }
    }

    #[tokio::test]
    async fn wipe_clears_everything() {
        let store = store();
        store.request("a").await;
        let token = store.approve("a").await.unwrap();
        store.request("b").await;

        let revoked = store.wipe().await;
        assert_eq!(revoked, vec![token]);
        assert!(!store.validate(&token));
        assert!(store.pending_callers().is_empty());
        assert_eq!(store.approved_count(), 0);
    }
}
