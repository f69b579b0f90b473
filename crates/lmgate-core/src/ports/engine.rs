//! Engine port definitions.
//!
//! Two seams live here. [`Engine`]/[`EngineConversation`]/[`EngineLoader`]
//! are the contract with the native runtime library: an opaque engine that
//! materializes stateful engine-conversations and streams token deltas back
//! over a channel. [`EngineRuntime`] is the narrower port the dispatcher
//! talks to; the gateway crate implements it on top of the former.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{ConversationHandle, ConversationId, Message, SamplingParams};
use crate::error::EngineError;

use super::sink::StreamSink;

/// Compute backend for an engine component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    Cpu,
    Gpu,
    Npu,
}

impl EngineBackend {
    /// Parse a backend from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cpu" => Some(Self::Cpu),
            "gpu" => Some(Self::Gpu),
            "npu" => Some(Self::Npu),
            _ => None,
        }
    }

    /// Wire string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Npu => "npu",
        }
    }
}

impl std::fmt::Display for EngineBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for constructing the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model_path: PathBuf,
    pub backend: EngineBackend,
    pub vision_backend: EngineBackend,
    pub audio_backend: EngineBackend,
}

/// Configuration for materializing one engine-conversation.
#[derive(Debug, Clone)]
pub struct EngineConversationConfig {
    pub system_instruction: String,
    /// History prefix replayed into the fresh context. The turn-triggering
    /// message is not part of this; it goes through `send`.
    pub initial_messages: Vec<Message>,
    pub sampling: SamplingParams,
}

/// One streaming event from an engine-conversation.
///
/// `Delta` chunks are partial text; the gateway concatenates them. The
/// stream ends with exactly one of `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Delta(String),
    Done,
    Error(String),
}

/// A materialized native context holding the KV cache for one system
/// instruction + sampling + history prefix.
#[async_trait]
pub trait EngineConversation: Send {
    /// Submit one message and stream the reply.
    ///
    /// Returns the event receiver; the engine keeps producing until it has
    /// sent a terminal event or every receiver is gone.
    async fn send(&mut self, message: Message) -> Result<mpsc::Receiver<EngineEvent>, EngineError>;

    /// Release the native context. Idempotent.
    async fn close(&mut self);
}

/// The singleton native engine.
#[async_trait]
pub trait Engine: Send {
    /// Materialize a new engine-conversation.
    async fn create_conversation(
        &mut self,
        config: EngineConversationConfig,
    ) -> Result<Box<dyn EngineConversation>, EngineError>;

    /// Release the engine and its hardware context. Idempotent.
    async fn close(&mut self);
}

/// Constructs and initializes an engine from a config.
///
/// The concrete loader binds the native runtime library; tests inject a
/// scripted one.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, config: EngineConfig) -> Result<Box<dyn Engine>, EngineError>;
}

/// The port the dispatcher and registry use to drive inference.
#[async_trait]
pub trait EngineRuntime: Send + Sync {
    /// Load a model, replacing any previously loaded one. Loading the same
    /// path again is a no-op.
    async fn load_model(&self, model_path: &Path, backend: EngineBackend)
    -> Result<(), EngineError>;

    /// Whether an engine is currently loaded.
    async fn is_loaded(&self) -> bool;

    /// Run one generation turn against a conversation, streaming deltas to
    /// `sink` and returning the full assistant reply on success.
    async fn generate(
        &self,
        conversation: Arc<ConversationHandle>,
        incoming: Vec<Message>,
        sink: Arc<dyn StreamSink>,
        cancel: CancellationToken,
    ) -> Result<String, EngineError>;

    /// Tear down the active engine-conversation if it belongs to `id`.
    /// Called whenever a conversation leaves the registry.
    async fn close_conversation_if_active(&self, id: ConversationId);

    /// Close the active binding and the engine itself.
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_wire_strings_round_trip() {
        for backend in [EngineBackend::Cpu, EngineBackend::Gpu, EngineBackend::Npu] {
            assert_eq!(EngineBackend::parse(backend.as_str()), Some(backend));
        }
        assert_eq!(EngineBackend::parse("tpu"), None);
    }
}
