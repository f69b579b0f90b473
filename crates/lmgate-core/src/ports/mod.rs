//! Port traits: the seams between the core services and infrastructure.

pub mod engine;
pub mod sink;
pub mod store;

pub use engine::{
    Engine, EngineBackend, EngineConfig, EngineConversation, EngineConversationConfig,
    EngineEvent, EngineLoader, EngineRuntime,
};
pub use sink::{ChannelSink, SingleShotSink, SinkEvent, StreamSink};
pub use store::{
    ConversationStore, NoopConversationStore, NoopTokenRepository, TokenRepository, TokenSnapshot,
};
