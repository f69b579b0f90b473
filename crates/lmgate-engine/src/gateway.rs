//! The engine gateway.
//!
//! The native runtime holds a single hardware context, so all inference is
//! serialized behind one mutex, and at most one engine-conversation is
//! materialized at a time. A logical conversation is bound to that context
//! while its turns run back-to-back; anyone else's turn tears the binding
//! down and rebuilds from serialized history.
//!
//! Reuse is worth the bookkeeping: rebuilding replays the entire history
//! through prefill, while a reused binding keeps the KV cache warm and pays
//! only for the new message.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lmgate_core::domain::{ConversationHandle, ConversationId, Message, SamplingParams};
use lmgate_core::error::EngineError;
use lmgate_core::ports::{
    ConversationStore, Engine, EngineBackend, EngineConversation, EngineConversationConfig,
    EngineEvent, EngineLoader, EngineRuntime, StreamSink,
};

use crate::loader::load_engine;

/// Model construction must finish within this window.
const LOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// System instruction used when a conversation was created without one.
const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful assistant.";

/// The engine-conversation currently materialized in the native runtime.
struct ActiveBinding {
    conversation_id: ConversationId,
    conversation: Box<dyn EngineConversation>,
    sampling: SamplingParams,
}

/// Everything guarded by the engine lock.
#[derive(Default)]
struct GatewayState {
    engine: Option<Box<dyn Engine>>,
    model_path: Option<PathBuf>,
    backend: Option<EngineBackend>,
    binding: Option<ActiveBinding>,
}

/// How one streamed turn ended.
enum TurnOutcome {
    Done,
    Failed(String),
    Cancelled,
}

/// Serialized access to the singleton native engine.
pub struct EngineGateway {
    loader: Arc<dyn EngineLoader>,
    store: Arc<dyn ConversationStore>,
    /// The engine lock. Held for the full duration of one generation,
    /// streaming included; the native engine is not reentrant.
    state: Mutex<GatewayState>,
    load_timeout: Duration,
}

impl EngineGateway {
    /// Create a gateway with no engine loaded.
    #[must_use]
    pub fn new(
        loader: Arc<dyn EngineLoader>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            loader,
            store,
            state: Mutex::new(GatewayState::default()),
            load_timeout: LOAD_TIMEOUT,
        }
    }

    /// Override the model-load timeout (tests).
    #[must_use]
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Backend the engine actually came up on, if loaded.
    pub async fn loaded_backend(&self) -> Option<EngineBackend> {
        self.state.lock().await.backend
    }

    /// Conversation currently bound to the engine, if any.
    pub async fn active_binding_id(&self) -> Option<ConversationId> {
        self.state
            .lock()
            .await
            .binding
            .as_ref()
            .map(|b| b.conversation_id)
    }

    /// Close the active binding, then the engine, clearing all fields.
    async fn close_locked(state: &mut GatewayState) {
        if let Some(mut binding) = state.binding.take() {
            binding.conversation.close().await;
        }
        if let Some(mut engine) = state.engine.take() {
            engine.close().await;
        }
        state.model_path = None;
        state.backend = None;
    }
}

#[async_trait]
impl EngineRuntime for EngineGateway {
    async fn load_model(
        &self,
        model_path: &Path,
        backend: EngineBackend,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.engine.is_some() && state.model_path.as_deref() == Some(model_path) {
            debug!(model_path = %model_path.display(), "Model already loaded");
            return Ok(());
        }

        Self::close_locked(&mut state).await;
        let (engine, effective) =
            load_engine(self.loader.as_ref(), model_path, backend, self.load_timeout).await?;
        state.engine = Some(engine);
        state.model_path = Some(model_path.to_path_buf());
        state.backend = Some(effective);
        info!(
            model_path = %model_path.display(),
            backend = %effective,
            "Model loaded"
        );
        Ok(())
    }

    async fn is_loaded(&self) -> bool {
        self.state.lock().await.engine.is_some()
    }

    async fn generate(
        &self,
        conversation: Arc<ConversationHandle>,
        incoming: Vec<Message>,
        sink: Arc<dyn StreamSink>,
        cancel: CancellationToken,
    ) -> Result<String, EngineError> {
        let incoming_len = incoming.len();
        if incoming_len == 0 {
            return Err(EngineError::Failure("no messages to send".to_string()));
        }

        let mut state = self.state.lock().await;
        if state.engine.is_none() {
            return Err(EngineError::NotLoaded);
        }

        // The incoming messages land in history before the engine runs, so
        // a failed turn still shows its input. The assistant reply is only
        // appended on success.
        let (sampling, seed, trigger) = {
            let mut conv = conversation.state.lock().await;
            conv.history.extend(incoming);
            let n = conv.history.len();
            let seed = conv.history[..n - 1].to_vec();
            let trigger = conv.history[n - 1].clone();
            (conv.sampling, seed, trigger)
        };

        let reuse = match &state.binding {
            Some(b) => {
                b.conversation_id == conversation.id
                    && incoming_len == 1
                    && b.sampling == sampling
            }
            None => false,
        };

        if reuse {
            debug!(conversation_id = %conversation.id, "Reusing active engine conversation");
        } else {
            if let Some(mut previous) = state.binding.take() {
                debug!(
                    conversation_id = %previous.conversation_id,
                    "Closing previous engine conversation"
                );
                previous.conversation.close().await;
            }

            let config = EngineConversationConfig {
                system_instruction: conversation
                    .system_instruction
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
                initial_messages: seed,
                sampling,
            };
            let Some(engine) = state.engine.as_mut() else {
                return Err(EngineError::NotLoaded);
            };
            let engine_conversation = engine.create_conversation(config).await?;
            state.binding = Some(ActiveBinding {
                conversation_id: conversation.id,
                conversation: engine_conversation,
                sampling,
            });
            debug!(conversation_id = %conversation.id, "Rebuilt engine conversation");
        }

        let Some(binding) = state.binding.as_mut() else {
            return Err(EngineError::Failure("engine binding unavailable".to_string()));
        };
        let mut events = binding.conversation.send(trigger).await?;

        let mut reply = String::new();
        let outcome = loop {
            tokio::select! {
                () = cancel.cancelled() => break TurnOutcome::Cancelled,
                event = events.recv() => match event {
                    Some(EngineEvent::Delta(delta)) => {
                        sink.on_token(&delta);
                        reply.push_str(&delta);
                    }
                    Some(EngineEvent::Done) | None => break TurnOutcome::Done,
                    Some(EngineEvent::Error(message)) => break TurnOutcome::Failed(message),
                },
            }
        };

        match outcome {
            TurnOutcome::Cancelled => {
                // Hard stop. The context is mid-generation and cannot be
                // trusted for another turn.
                if let Some(mut binding) = state.binding.take() {
                    binding.conversation.close().await;
                }
                info!(conversation_id = %conversation.id, "Generation cancelled");
                Err(EngineError::Cancelled)
            }
            TurnOutcome::Failed(message) => {
                // The binding stays warm; the caller decides whether to retry.
                warn!(conversation_id = %conversation.id, error = %message, "Engine reported failure");
                Err(EngineError::Failure(message))
            }
            TurnOutcome::Done => {
                // Append while the engine lock is still held, so a waiting
                // turn can never rebuild from a history missing this reply.
                if !reply.is_empty() {
                    conversation
                        .state
                        .lock()
                        .await
                        .history
                        .push(Message::assistant_text(reply.clone()));
                }
                drop(state);

                let snapshot = conversation.snapshot().await;
                if let Err(e) = self.store.save(&snapshot).await {
                    warn!(conversation_id = %conversation.id, error = %e, "Failed to persist conversation");
                }
                Ok(reply)
            }
        }
    }

    async fn close_conversation_if_active(&self, id: ConversationId) {
        let mut state = self.state.lock().await;
        let is_bound = state
            .binding
            .as_ref()
            .is_some_and(|b| b.conversation_id == id);
        if is_bound {
            if let Some(mut binding) = state.binding.take() {
                binding.conversation.close().await;
            }
            debug!(conversation_id = %id, "Dropped active engine binding");
        }
    }

    async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        Self::close_locked(&mut state).await;
        info!("Engine gateway shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngineLoader;
    use lmgate_core::domain::{ApiToken, Conversation, Role};
    use lmgate_core::ports::{ChannelSink, NoopConversationStore, SinkEvent};
    use std::sync::atomic::Ordering;

    fn handle(system: Option<&str>) -> Arc<ConversationHandle> {
        let record = Conversation::new(ApiToken::generate(), system.map(String::from), 60_000);
        Arc::new(ConversationHandle::from_record(record))
    }

    fn user(text: &str) -> Message {
        Message::text(Role::User, text)
    }

    async fn loaded_gateway(loader: MockEngineLoader) -> EngineGateway {
        let gateway = EngineGateway::new(Arc::new(loader), Arc::new(NoopConversationStore));
        gateway
            .load_model(Path::new("/models/test.litertlm"), EngineBackend::Cpu)
            .await
            .unwrap();
        gateway
    }

    #[tokio::test]
    async fn generate_without_model_fails() {
        let gateway = EngineGateway::new(
            Arc::new(MockEngineLoader::new()),
            Arc::new(NoopConversationStore),
        );
        let (sink, _rx) = ChannelSink::new();
        let err = gateway
            .generate(handle(None), vec![user("hi")], sink, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::NotLoaded);
    }

    #[tokio::test]
    async fn loading_same_path_is_idempotent() {
        let loader = MockEngineLoader::new();
        let probe = loader.probe();
        let gateway = loaded_gateway(loader).await;

        gateway
            .load_model(Path::new("/models/test.litertlm"), EngineBackend::Cpu)
            .await
            .unwrap();
        assert_eq!(probe.engines_loaded.load(Ordering::SeqCst), 1);

        gateway
            .load_model(Path::new("/models/other.litertlm"), EngineBackend::Cpu)
            .await
            .unwrap();
        assert_eq!(probe.engines_loaded.load(Ordering::SeqCst), 2);
        assert_eq!(probe.engines_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gpu_failure_falls_back_to_cpu_once() {
        let loader = MockEngineLoader::failing_on(vec![EngineBackend::Gpu]);
        let gateway = EngineGateway::new(Arc::new(loader), Arc::new(NoopConversationStore));

        gateway
            .load_model(Path::new("/models/test.litertlm"), EngineBackend::Gpu)
            .await
            .unwrap();
        assert_eq!(gateway.loaded_backend().await, Some(EngineBackend::Cpu));
    }

    #[tokio::test]
    async fn cpu_failure_propagates() {
        let loader = MockEngineLoader::failing_on(vec![EngineBackend::Cpu]);
        let gateway = EngineGateway::new(Arc::new(loader), Arc::new(NoopConversationStore));

        let err = gateway
            .load_model(Path::new("/models/test.litertlm"), EngineBackend::Cpu)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Failure(_)));
    }

    #[tokio::test]
    async fn streams_deltas_and_appends_reply() {
        let loader = MockEngineLoader::new();
        let gateway = loaded_gateway(loader).await;
        let conversation = handle(Some("be helpful"));

        let (sink, mut rx) = ChannelSink::new();
        let reply = gateway
            .generate(
                conversation.clone(),
                vec![user("Hi")],
                sink,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(reply, "echo: Hi");
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Token("echo: ".into()));
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Token("Hi".into()));

        let state = conversation.state.lock().await;
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history[1].role, Role::Assistant);
        assert_eq!(state.history[1].joined_text(), "echo: Hi");
    }

    #[tokio::test]
    async fn consecutive_single_message_turns_reuse_the_binding() {
        let loader = MockEngineLoader::new();
        let probe = loader.probe();
        let gateway = loaded_gateway(loader).await;
        let conversation = handle(None);

        for text in ["Hi", "Again?"] {
            let (sink, _rx) = ChannelSink::new();
            gateway
                .generate(
                    conversation.clone(),
                    vec![user(text)],
                    sink,
                    CancellationToken::new(),
                )
                .await
                .unwrap();
        }

        assert_eq!(probe.conversations_created.load(Ordering::SeqCst), 1);
        assert_eq!(conversation.state.lock().await.history.len(), 4);
    }

    #[tokio::test]
    async fn multi_message_turn_forces_rebuild() {
        let loader = MockEngineLoader::new();
        let probe = loader.probe();
        let gateway = loaded_gateway(loader).await;
        let conversation = handle(None);

        let (sink, _rx) = ChannelSink::new();
        gateway
            .generate(
                conversation.clone(),
                vec![user("Hi")],
                sink,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let (sink, _rx) = ChannelSink::new();
        gateway
            .generate(
                conversation.clone(),
                vec![user("first"), user("second")],
                sink,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(probe.conversations_created.load(Ordering::SeqCst), 2);
        // The rebuild seeds everything except the triggering message.
        let configs = probe.configs.lock().unwrap();
        assert_eq!(configs[1].initial_messages.len(), 3);
    }

    #[tokio::test]
    async fn sampling_change_forces_rebuild_with_history_seed() {
        let loader = MockEngineLoader::new();
        let probe = loader.probe();
        let gateway = loaded_gateway(loader).await;
        let conversation = handle(None);

        let (sink, _rx) = ChannelSink::new();
        gateway
            .generate(
                conversation.clone(),
                vec![user("Hi")],
                sink,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        conversation.state.lock().await.sampling.temperature = 0.1;

        let (sink, _rx) = ChannelSink::new();
        gateway
            .generate(
                conversation.clone(),
                vec![user("Again?")],
                sink,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(probe.conversations_created.load(Ordering::SeqCst), 2);
        // The rebuild replays the prior turn (user + assistant) and sends
        // only the new message.
        let configs = probe.configs.lock().unwrap();
        assert_eq!(configs[1].initial_messages.len(), 2);
        assert_eq!(configs[1].sampling.temperature, 0.1);

        // After the rebuild, the next single-message turn reuses again.
        drop(configs);
        let (sink, _rx) = ChannelSink::new();
        gateway
            .generate(
                conversation.clone(),
                vec![user("More")],
                sink,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(probe.conversations_created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn engine_failure_keeps_the_binding_warm() {
        let loader = MockEngineLoader::new();
        let probe = loader.probe();
        let gateway = loaded_gateway(loader).await;
        let conversation = handle(None);

        probe.fail_sends.store(1, Ordering::SeqCst);
        let (sink, _rx) = ChannelSink::new();
        let err = gateway
            .generate(
                conversation.clone(),
                vec![user("Hi")],
                sink,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Failure(_)));

        // User message stays in history, no assistant reply.
        assert_eq!(conversation.state.lock().await.history.len(), 1);
        assert_eq!(gateway.active_binding_id().await, Some(conversation.id));

        // The warm binding serves the next turn without a rebuild.
        let (sink, _rx) = ChannelSink::new();
        gateway
            .generate(
                conversation.clone(),
                vec![user("retry")],
                sink,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(probe.conversations_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_tears_down_the_binding() {
        let loader = MockEngineLoader::new();
        let probe = loader.probe();
        probe.delta_delay_ms.store(50, Ordering::SeqCst);
        let gateway = loaded_gateway(loader).await;
        let conversation = handle(None);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let (sink, _rx) = ChannelSink::new();
        let err = gateway
            .generate(conversation.clone(), vec![user("Hi")], sink, cancel)
            .await
            .unwrap_err();

        assert_eq!(err, EngineError::Cancelled);
        assert_eq!(gateway.active_binding_id().await, None);
        assert_eq!(probe.conversations_closed.load(Ordering::SeqCst), 1);
        // The pre-appended user message stays visible.
        assert_eq!(conversation.state.lock().await.history.len(), 1);
    }

    #[tokio::test]
    async fn empty_reply_is_not_appended() {
        let loader = MockEngineLoader::new();
        let probe = loader.probe();
        probe.empty_replies.store(true, Ordering::SeqCst);
        let gateway = loaded_gateway(loader).await;
        let conversation = handle(None);

        let (sink, _rx) = ChannelSink::new();
        let reply = gateway
            .generate(
                conversation.clone(),
                vec![user("Hi")],
                sink,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(reply.is_empty());
        assert_eq!(conversation.state.lock().await.history.len(), 1);
    }

    #[tokio::test]
    async fn invalidation_closes_only_matching_binding() {
        let loader = MockEngineLoader::new();
        let probe = loader.probe();
        let gateway = loaded_gateway(loader).await;
        let conversation = handle(None);

        let (sink, _rx) = ChannelSink::new();
        gateway
            .generate(
                conversation.clone(),
                vec![user("Hi")],
                sink,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        gateway
            .close_conversation_if_active(ConversationId::generate())
            .await;
        assert_eq!(gateway.active_binding_id().await, Some(conversation.id));

        gateway.close_conversation_if_active(conversation.id).await;
        assert_eq!(gateway.active_binding_id().await, None);
        assert_eq!(probe.conversations_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_system_instruction_fills_in() {
        let loader = MockEngineLoader::new();
        let probe = loader.probe();
        let gateway = loaded_gateway(loader).await;

        let (sink, _rx) = ChannelSink::new();
        gateway
            .generate(handle(None), vec![user("Hi")], sink, CancellationToken::new())
            .await
            .unwrap();

        let configs = probe.configs.lock().unwrap();
        assert_eq!(configs[0].system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
    }
}
