//! The authenticated entry layer.
//!
//! Every client-facing operation authenticates the presenting token, routes
//! to the owning component, and renders failures as structured errors.
//! Unauthorized and not-found are deliberately indistinguishable on the
//! wire so a caller cannot probe for foreign conversations.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::codec::{completion_json, decode_chat_request, error_json};
use crate::domain::{ApiToken, ConversationId, ConversationInfo, TokenGrant, now_ms};
use crate::error::EngineError;
use crate::events::{EventEmitter, GatewayEvent};
use crate::ports::{EngineBackend, EngineRuntime, SingleShotSink, StreamSink};
use crate::services::registry::ConversationRegistry;
use crate::services::token_store::TokenStore;

/// Sentinel returned while a token request awaits host approval.
pub const PENDING_USER_APPROVAL: &str = "PENDING_USER_APPROVAL";

/// Error string for any token that does not validate.
pub const INVALID_TOKEN_ERROR: &str = "Invalid API token";

/// Error string shared by missing, foreign, and expired conversations.
pub const CONVERSATION_ERROR: &str = "Conversation not found, expired, or unauthorized";

/// Error string for a generate call with no messages.
pub const EMPTY_MESSAGES_ERROR: &str = "No messages provided";

/// Structured failure from a dispatcher operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{INVALID_TOKEN_ERROR}")]
    InvalidToken,

    #[error("{CONVERSATION_ERROR}")]
    Conversation,
}

impl DispatchError {
    /// Render as the wire error envelope.
    #[must_use]
    pub fn to_envelope(&self) -> String {
        error_json(&self.to_string())
    }
}

/// Counts one in-flight generation for the lifetime of the guard.
struct RequestGuard<'a> {
    counter: &'a AtomicI64,
}

impl<'a> RequestGuard<'a> {
    fn new(counter: &'a AtomicI64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The gateway's public operation surface.
pub struct Dispatcher {
    tokens: Arc<TokenStore>,
    registry: Arc<ConversationRegistry>,
    engine: Arc<dyn EngineRuntime>,
    events: Arc<dyn EventEmitter>,
    active_requests: AtomicI64,
    host_caller_id: String,
}

impl Dispatcher {
    /// Assemble the dispatcher over its collaborators.
    #[must_use]
    pub fn new(
        tokens: Arc<TokenStore>,
        registry: Arc<ConversationRegistry>,
        engine: Arc<dyn EngineRuntime>,
        events: Arc<dyn EventEmitter>,
        host_caller_id: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            registry,
            engine,
            events,
            active_requests: AtomicI64::new(0),
            host_caller_id: host_caller_id.into(),
        }
    }

    fn authenticate(&self, token: &str) -> Result<ApiToken, DispatchError> {
        ApiToken::parse(token)
            .filter(|t| self.tokens.validate(t))
            .ok_or(DispatchError::InvalidToken)
    }

    // ── client operations ────────────────────────────────────────────────

    /// A caller asks for its token. Returns the token's wire form, or the
    /// [`PENDING_USER_APPROVAL`] sentinel while the host decides.
    pub async fn request_token(&self, caller_id: &str) -> String {
        match self.tokens.request(caller_id).await {
            TokenGrant::Approved(token) => token.to_string(),
            TokenGrant::Pending => {
                self.events.emit(GatewayEvent::TokenRequested {
                    caller_id: caller_id.to_string(),
                });
                PENDING_USER_APPROVAL.to_string()
            }
        }
    }

    /// Revoke a token and close every conversation it owns. Only honored
    /// when presented by the host itself.
    pub async fn revoke_token(&self, presenting_caller_id: &str, token: &str) -> bool {
        if presenting_caller_id != self.host_caller_id {
            warn!(
                caller_id = presenting_caller_id,
                "Refusing token revocation from non-host caller"
            );
            return false;
        }
        let Some(token) = ApiToken::parse(token) else {
            return false;
        };
        let Some(caller_id) = self.tokens.revoke(&token).await else {
            return false;
        };

        let closed = self.registry.close_all_for(token).await;
        info!(caller_id, closed, "Token revoked");
        self.events.emit(GatewayEvent::TokenRevoked { caller_id });
        true
    }

    /// Start a conversation owned by the presenting token.
    pub async fn start_conversation(
        &self,
        token: &str,
        system_instruction: Option<String>,
        ttl_ms: i64,
    ) -> Result<ConversationInfo, DispatchError> {
        let token = self.authenticate(token)?;
        let handle = self
            .registry
            .create(token, system_instruction, ttl_ms)
            .await;
        self.events.emit(GatewayEvent::ConversationCreated {
            conversation_id: handle.id.to_string(),
        });
        Ok(handle.info(now_ms()))
    }

    /// Close a conversation owned by the presenting token.
    pub async fn close_conversation(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<(), DispatchError> {
        let token = self.authenticate(token)?;
        let id = ConversationId::parse(conversation_id).ok_or(DispatchError::Conversation)?;
        self.registry
            .close(id, token)
            .await
            .map_err(|_| DispatchError::Conversation)
    }

    /// Inspect a conversation's lifetime without renewing it.
    pub async fn conversation_info(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<ConversationInfo, DispatchError> {
        let token = self.authenticate(token)?;
        let id = ConversationId::parse(conversation_id).ok_or(DispatchError::Conversation)?;
        let handle = self
            .registry
            .peek(id, token)
            .await
            .map_err(|_| DispatchError::Conversation)?;
        Ok(handle.info(now_ms()))
    }

    /// Run one generation turn. All outcomes are delivered through `sink`;
    /// exactly one terminal callback fires.
    pub async fn generate(
        &self,
        token: &str,
        conversation_id: &str,
        request_json: &str,
        sink: Arc<dyn StreamSink>,
        cancel: CancellationToken,
    ) {
        let sink = SingleShotSink::new(sink);
        let _guard = RequestGuard::new(&self.active_requests);

        let token = match self.authenticate(token) {
            Ok(token) => token,
            Err(_) => {
                sink.on_error(INVALID_TOKEN_ERROR);
                return;
            }
        };
        let Some(id) = ConversationId::parse(conversation_id) else {
            sink.on_error(CONVERSATION_ERROR);
            return;
        };
        let handle = match self.registry.lookup(id, token).await {
            Ok(handle) => handle,
            Err(_) => {
                sink.on_error(CONVERSATION_ERROR);
                return;
            }
        };
        let request = match decode_chat_request(request_json) {
            Ok(request) => request,
            Err(e) => {
                sink.on_error(&e.to_string());
                return;
            }
        };
        if request.messages.is_empty() {
            sink.on_error(EMPTY_MESSAGES_ERROR);
            return;
        }

        // Overrides must land before the engine compares sampling for the
        // reuse decision.
        {
            let mut state = handle.state.lock().await;
            state
                .sampling
                .apply(request.temperature, request.top_p, request.top_k);
        }

        self.events.emit(GatewayEvent::GenerationStarted {
            conversation_id: id.to_string(),
        });

        let engine_sink: Arc<dyn StreamSink> = sink.clone();
        match self
            .engine
            .generate(handle, request.messages, engine_sink, cancel)
            .await
        {
            Ok(reply) => {
                sink.on_complete(&completion_json(&reply, request.model.as_deref()));
                self.events.emit(GatewayEvent::GenerationCompleted {
                    conversation_id: id.to_string(),
                    reply_chars: reply.chars().count(),
                });
            }
            Err(e) => {
                sink.on_error(&e.to_string());
                self.events.emit(GatewayEvent::GenerationFailed {
                    conversation_id: id.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Liveness probe.
    pub fn ping(&self, token: &str) -> String {
        match self.authenticate(token) {
            Ok(_) => "pong".to_string(),
            Err(_) => "error: invalid token".to_string(),
        }
    }

    /// Health probe.
    pub fn health(&self, token: &str) -> String {
        match self.authenticate(token) {
            Ok(_) => "ok".to_string(),
            Err(_) => "error: invalid token".to_string(),
        }
    }

    /// Current number of in-flight generate calls, or `-1` for an invalid
    /// token.
    pub fn load(&self, token: &str) -> i64 {
        match self.authenticate(token) {
            Ok(_) => self.active_requests.load(Ordering::SeqCst),
            Err(_) => -1,
        }
    }

    // ── host operations ──────────────────────────────────────────────────

    /// Approve a pending caller, minting its token.
    pub async fn approve(&self, caller_id: &str) -> Option<String> {
        let token = self.tokens.approve(caller_id).await?;
        self.events.emit(GatewayEvent::TokenApproved {
            caller_id: caller_id.to_string(),
        });
        Some(token.to_string())
    }

    /// Deny a pending caller.
    pub async fn deny(&self, caller_id: &str) {
        self.tokens.deny(caller_id).await;
        self.events.emit(GatewayEvent::TokenDenied {
            caller_id: caller_id.to_string(),
        });
    }

    /// Callers currently awaiting approval.
    #[must_use]
    pub fn pending_callers(&self) -> Vec<String> {
        self.tokens.pending_callers()
    }

    /// Load a model into the engine.
    pub async fn load_model(
        &self,
        model_path: &Path,
        backend: EngineBackend,
    ) -> Result<(), EngineError> {
        self.engine.load_model(model_path, backend).await?;
        self.events.emit(GatewayEvent::ModelLoaded {
            model_path: model_path.display().to_string(),
            backend: backend.to_string(),
        });
        Ok(())
    }

    /// Full wipe: revoke every token and close every conversation.
    pub async fn wipe_tokens(&self) {
        for token in self.tokens.wipe().await {
            self.registry.close_all_for(token).await;
        }
    }

    /// Graceful shutdown: drop the active binding and the engine.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
        self.events.emit(GatewayEvent::EngineClosed);
    }

    /// In-flight generation count (host diagnostics).
    #[must_use]
    pub fn active_request_count(&self) -> i64 {
        self.active_requests.load(Ordering::SeqCst)
    }
}
