//! # lmgate
//!
//! Convenience facade over the lmgate workspace crates:
//!
//! - `lmgate_core` — domain types, port traits, codec, and services
//! - `lmgate_engine` — the engine gateway over the native runtime
//! - `lmgate_store` — file-backed persistence adapters
//! - `lmgate_axum` — the HTTP compatibility surface and composition root
//!
//! Most embedders want [`lmgate_axum::bootstrap`] with their own
//! [`EngineLoader`] implementation; everything else is reachable from the
//! re-exports below.

pub use lmgate_core::{
    ApiToken, ChannelSink, ContentPart, Conversation, ConversationHandle, ConversationId,
    ConversationInfo, ConversationRegistry, ConversationStore, DispatchError, Dispatcher, Engine,
    EngineBackend, EngineConfig, EngineConversation, EngineConversationConfig, EngineError,
    EngineEvent, EngineLoader, EngineRuntime, EventBroadcaster, EventEmitter, GatewayEvent,
    Message, NoopEventEmitter, PENDING_USER_APPROVAL, RegistryError, Role, SamplingParams,
    Settings, SingleShotSink, SinkEvent, StreamSink, TokenGrant, TokenRepository, TokenStore,
};

pub use lmgate_axum::{GatewayConfig, GatewayContext, bootstrap, start_server};
pub use lmgate_engine::EngineGateway;
pub use lmgate_store::{ConversationFileStore, FileTokenRepository};

/// Full re-export of the core crate.
pub mod core {
    pub use lmgate_core::*;
}

/// Full re-export of the engine crate.
pub mod engine {
    pub use lmgate_engine::*;
}

/// Full re-export of the store crate.
pub mod store {
    pub use lmgate_store::*;
}
