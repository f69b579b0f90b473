//! Error types shared across the gateway core.

use thiserror::Error;

/// Errors from the conversation registry's authenticated lookups.
///
/// All three variants are rendered identically to clients so that a foreign
/// caller cannot distinguish "does not exist" from "not yours".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Conversation {0} is not owned by the presenting token")]
    Unauthorized(String),

    #[error("Conversation {0} has expired")]
    Expired(String),
}

/// Errors from the engine gateway and the native runtime behind it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Model not loaded")]
    NotLoaded,

    #[error("Engine failure: {0}")]
    Failure(String),

    #[error("cancelled")]
    Cancelled,

    #[error("Model load timed out after {0} seconds")]
    LoadTimeout(u64),
}

/// Errors from persistence adapters.
///
/// Callers treat these as advisory: a failed write is logged and the
/// in-memory state stays authoritative for the process lifetime.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from decoding wire payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Malformed request JSON: {0}")]
    Malformed(String),

    #[error("Invalid message role: {0}")]
    InvalidRole(String),
}

/// Umbrella error for the core services.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Invalid API token")]
    InvalidToken,
}
