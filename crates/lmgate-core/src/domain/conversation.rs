//! Conversation domain types.
//!
//! A [`Conversation`] is the serializable record: identity, ownership, TTL
//! bookkeeping, accumulated history, and sampling parameters. The registry
//! holds live conversations as [`ConversationHandle`]s, which keep the
//! immutable fields plain, the sliding `last_access` timestamp atomic, and
//! the mutable turn state behind an async mutex.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::message::Message;
use super::token::ApiToken;

/// Default time-to-live applied when a caller passes a non-positive TTL.
pub const DEFAULT_TTL_MS: u64 = 30 * 60 * 1000;

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Globally unique conversation identifier, rendered as 32 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationId(Uuid);

impl ConversationId {
    /// Mint a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier from its wire form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl Serialize for ConversationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0.simple())
    }
}

impl<'de> Deserialize<'de> for ConversationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| D::Error::custom("invalid conversation id"))
    }
}

/// Sampling parameters for generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.95,
            top_k: 40,
        }
    }
}

impl SamplingParams {
    /// Apply per-turn overrides in place. Absent fields are untouched.
    pub fn apply(
        &mut self,
        temperature: Option<f64>,
        top_p: Option<f64>,
        top_k: Option<u32>,
    ) -> bool {
        let mut changed = false;
        if let Some(t) = temperature {
            changed |= self.temperature != t;
            self.temperature = t;
        }
        if let Some(p) = top_p {
            changed |= self.top_p != p;
            self.top_p = p;
        }
        if let Some(k) = top_k {
            changed |= self.top_k != k;
            self.top_k = k;
        }
        changed
    }
}

/// The serializable conversation record (also the on-disk shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub owner_token: ApiToken,
    pub system_instruction: Option<String>,
    pub ttl_ms: u64,
    pub created_at_ms: u64,
    pub last_access_ms: u64,
    pub history: Vec<Message>,
    pub sampling: SamplingParams,
}

impl Conversation {
    /// Create a fresh record. Non-positive `ttl_ms` falls back to
    /// [`DEFAULT_TTL_MS`].
    #[must_use]
    pub fn new(owner_token: ApiToken, system_instruction: Option<String>, ttl_ms: i64) -> Self {
        let now = now_ms();
        Self {
            id: ConversationId::generate(),
            owner_token,
            system_instruction,
            ttl_ms: effective_ttl(ttl_ms),
            created_at_ms: now,
            last_access_ms: now,
            history: Vec::new(),
            sampling: SamplingParams::default(),
        }
    }

    /// Whether the sliding TTL window has elapsed.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.last_access_ms) > self.ttl_ms
    }
}

/// Resolve a requested TTL: non-positive means "use the default".
#[must_use]
pub fn effective_ttl(requested_ms: i64) -> u64 {
    if requested_ms <= 0 {
        DEFAULT_TTL_MS
    } else {
        requested_ms as u64
    }
}

/// Snapshot of a conversation's lifetime, returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub conversation_id: String,
    pub ttl_ms: u64,
    pub created_at: u64,
    pub last_access_time: u64,
    pub expires_at: u64,
    pub remaining_ttl_ms: u64,
}

/// Mutable per-turn state, guarded by the handle's mutex.
#[derive(Debug)]
pub struct ConversationState {
    pub history: Vec<Message>,
    pub sampling: SamplingParams,
}

/// A live conversation as held by the registry.
///
/// `last_access_ms` is a plain atomic so touching the TTL window never
/// contends with a generation in flight; history and sampling have a single
/// mutator at a time because all generation is serialized by the engine lock.
#[derive(Debug)]
pub struct ConversationHandle {
    pub id: ConversationId,
    pub owner_token: ApiToken,
    pub system_instruction: Option<String>,
    pub ttl_ms: u64,
    pub created_at_ms: u64,
    last_access_ms: AtomicU64,
    pub state: Mutex<ConversationState>,
}

impl ConversationHandle {
    /// Wrap a record for live use.
    #[must_use]
    pub fn from_record(record: Conversation) -> Self {
        Self {
            id: record.id,
            owner_token: record.owner_token,
            system_instruction: record.system_instruction,
            ttl_ms: record.ttl_ms,
            created_at_ms: record.created_at_ms,
            last_access_ms: AtomicU64::new(record.last_access_ms),
            state: Mutex::new(ConversationState {
                history: record.history,
                sampling: record.sampling,
            }),
        }
    }

    /// Last access timestamp in epoch milliseconds.
    #[must_use]
    pub fn last_access_ms(&self) -> u64 {
        self.last_access_ms.load(Ordering::Acquire)
    }

    /// Reset the sliding TTL window to `now`.
    pub fn touch(&self, now: u64) {
        self.last_access_ms.store(now, Ordering::Release);
    }

    /// Whether the sliding TTL window has elapsed.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.last_access_ms()) > self.ttl_ms
    }

    /// Lifetime snapshot for callers.
    #[must_use]
    pub fn info(&self, now: u64) -> ConversationInfo {
        let last_access = self.last_access_ms();
        let expires_at = last_access.saturating_add(self.ttl_ms);
        ConversationInfo {
            conversation_id: self.id.to_string(),
            ttl_ms: self.ttl_ms,
            created_at: self.created_at_ms,
            last_access_time: last_access,
            expires_at,
            remaining_ttl_ms: expires_at.saturating_sub(now),
        }
    }

    /// Full serializable snapshot, for persistence.
    pub async fn snapshot(&self) -> Conversation {
        let state = self.state.lock().await;
        Conversation {
            id: self.id,
            owner_token: self.owner_token,
            system_instruction: self.system_instruction.clone(),
            ttl_ms: self.ttl_ms,
            created_at_ms: self.created_at_ms,
            last_access_ms: self.last_access_ms(),
            history: state.history.clone(),
            sampling: state.sampling,
        }
    }
}
