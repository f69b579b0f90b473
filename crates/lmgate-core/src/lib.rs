//! # lmgate-core
//!
//! Domain types, port traits, and services for the lmgate inference
//! gateway: the token store, the conversation registry with TTL eviction,
//! the wire codec, and the authenticated dispatcher. Infrastructure — the
//! engine gateway and the persistence adapters — lives in sibling crates
//! behind the ports defined here.

pub mod codec;
pub mod domain;
pub mod error;
pub mod events;
pub mod paths;
pub mod ports;
pub mod services;
pub mod settings;

pub use codec::{ChatRequest, DEFAULT_MODEL_NAME, decode_chat_request};
pub use domain::{
    ApiToken, ContentPart, Conversation, ConversationHandle, ConversationId, ConversationInfo,
    DEFAULT_TTL_MS, Message, Role, SamplingParams, TokenGrant, now_ms,
};
pub use error::{CodecError, CoreError, EngineError, RegistryError, StoreError};
pub use events::{EventBroadcaster, EventEmitter, GatewayEvent, NoopEventEmitter};
pub use ports::{
    ChannelSink, ConversationStore, Engine, EngineBackend, EngineConfig, EngineConversation,
    EngineConversationConfig, EngineEvent, EngineLoader, EngineRuntime, SingleShotSink, SinkEvent,
    StreamSink, TokenRepository, TokenSnapshot,
};
pub use services::{
    CONVERSATION_ERROR, ConversationRegistry, DispatchError, Dispatcher, EMPTY_MESSAGES_ERROR,
    INVALID_TOKEN_ERROR, PENDING_USER_APPROVAL, TokenStore,
};
pub use settings::{Settings, SettingsError, validate_settings};
