//! # lmgate-store
//!
//! File-backed persistence adapters: the conversation directory store and
//! the token KV file with its backup mirror. Both implement ports from
//! `lmgate-core`; the gateway never touches the filesystem directly.

mod conversation_files;
mod token_file;

pub use conversation_files::ConversationFileStore;
pub use token_file::FileTokenRepository;
