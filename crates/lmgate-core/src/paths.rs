//! Filesystem layout for durable gateway state.
//!
//! The data root is resolved from `LMGATE_DATA_DIR` when set, otherwise
//! `~/.lmgate`. Everything durable lives under it:
//!
//! ```text
//! <root>/conversations/<id>.json   one file per conversation
//! <root>/auth_tokens.json          token KV store (approved + pending)
//! <root>/auth_tokens_backup.json   approved-token mirror
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Environment variable overriding the data root.
pub const DATA_DIR_ENV: &str = "LMGATE_DATA_DIR";

/// Path resolution errors.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("Cannot resolve a data directory: neither {DATA_DIR_ENV} nor HOME is set")]
    NoDataRoot,

    #[error("Failed to create directory {path}: {reason}")]
    CreateFailed { path: PathBuf, reason: String },
}

/// Resolve the data root directory.
pub fn data_root() -> Result<PathBuf, PathError> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".lmgate"))
        .ok_or(PathError::NoDataRoot)
}

/// Directory holding one JSON file per conversation.
#[must_use]
pub fn conversations_dir(root: &Path) -> PathBuf {
    root.join("conversations")
}

/// Primary token store file.
#[must_use]
pub fn token_store_path(root: &Path) -> PathBuf {
    root.join("auth_tokens.json")
}

/// Defensive mirror of the approved-token map.
#[must_use]
pub fn token_backup_path(root: &Path) -> PathBuf {
    root.join("auth_tokens_backup.json")
}

/// Create a directory (and parents) if missing.
pub fn ensure_directory(path: &Path) -> Result<(), PathError> {
    std::fs::create_dir_all(path).map_err(|e| PathError::CreateFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
