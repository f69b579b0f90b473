//! Scripted engine for tests and local development.
//!
//! The mock echoes each message back as two deltas (`"echo: "` + the
//! message text) so callers can assert on delta concatenation. A shared
//! [`MockEngineProbe`] exposes counters for conversations created and
//! closed, the configs they were created with, and knobs for injected
//! failures, empty replies, and slow streaming.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use lmgate_core::domain::Message;
use lmgate_core::error::EngineError;
use lmgate_core::ports::{
    Engine, EngineBackend, EngineConfig, EngineConversation, EngineConversationConfig,
    EngineEvent, EngineLoader,
};

/// Shared observable state for all engines a loader produces.
#[derive(Clone, Default)]
pub struct MockEngineProbe {
    /// Engines successfully constructed.
    pub engines_loaded: Arc<AtomicUsize>,
    /// Engines closed.
    pub engines_closed: Arc<AtomicUsize>,
    /// Engine-conversations materialized.
    pub conversations_created: Arc<AtomicUsize>,
    /// Engine-conversations closed.
    pub conversations_closed: Arc<AtomicUsize>,
    /// Configs each conversation was created with, in order.
    pub configs: Arc<Mutex<Vec<EngineConversationConfig>>>,
    /// Number of upcoming sends that should fail with an engine error.
    pub fail_sends: Arc<AtomicUsize>,
    /// When set, replies stream no deltas at all.
    pub empty_replies: Arc<AtomicBool>,
    /// Pause between streamed deltas, for cancellation tests.
    pub delta_delay_ms: Arc<AtomicU64>,
}

/// Loader producing [`MockEngine`]s, optionally refusing some backends.
#[derive(Default)]
pub struct MockEngineLoader {
    probe: MockEngineProbe,
    failing_backends: HashSet<EngineBackend>,
}

impl MockEngineLoader {
    /// Loader that succeeds on every backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader that fails engine construction on the given backends.
    #[must_use]
    pub fn failing_on(backends: Vec<EngineBackend>) -> Self {
        Self {
            probe: MockEngineProbe::default(),
            failing_backends: backends.into_iter().collect(),
        }
    }

    /// Handle to the shared probe.
    #[must_use]
    pub fn probe(&self) -> MockEngineProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl EngineLoader for MockEngineLoader {
    async fn load(&self, config: EngineConfig) -> Result<Box<dyn Engine>, EngineError> {
        if self.failing_backends.contains(&config.backend) {
            return Err(EngineError::Failure(format!(
                "backend {} unavailable",
                config.backend
            )));
        }
        self.probe.engines_loaded.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEngine {
            probe: self.probe.clone(),
        }))
    }
}

/// A scripted engine.
pub struct MockEngine {
    probe: MockEngineProbe,
}

#[async_trait]
impl Engine for MockEngine {
    async fn create_conversation(
        &mut self,
        config: EngineConversationConfig,
    ) -> Result<Box<dyn EngineConversation>, EngineError> {
        self.probe
            .conversations_created
            .fetch_add(1, Ordering::SeqCst);
        if let Ok(mut configs) = self.probe.configs.lock() {
            configs.push(config);
        }
        Ok(Box::new(MockConversation {
            probe: self.probe.clone(),
            closed: false,
        }))
    }

    async fn close(&mut self) {
        self.probe.engines_closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A scripted engine-conversation.
pub struct MockConversation {
    probe: MockEngineProbe,
    closed: bool,
}

#[async_trait]
impl EngineConversation for MockConversation {
    async fn send(&mut self, message: Message) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        let (tx, rx) = mpsc::channel(8);
        let probe = self.probe.clone();

        let should_fail = probe
            .fail_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let empty = probe.empty_replies.load(Ordering::SeqCst);
        let delay = Duration::from_millis(probe.delta_delay_ms.load(Ordering::SeqCst));

        tokio::spawn(async move {
            if should_fail {
                let _ = tx
                    .send(EngineEvent::Error("mock engine failure".to_string()))
                    .await;
                return;
            }

            if !empty {
                let deltas = ["echo: ".to_string(), message.joined_text()];
                for delta in deltas {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if tx.send(EngineEvent::Delta(delta)).await.is_err() {
                        return;
                    }
                }
            }
            let _ = tx.send(EngineEvent::Done).await;
        });

        Ok(rx)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.probe
                .conversations_closed
                .fetch_add(1, Ordering::SeqCst);
        }
    }
}
