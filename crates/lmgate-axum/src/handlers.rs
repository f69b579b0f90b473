//! HTTP handlers over the dispatcher.
//!
//! Clients authenticate with `Authorization: Bearer <token>` and address a
//! conversation with the `x-conversation-id` header on completion calls.
//! Streaming responses carry `{"delta": …}` chunks, the final completion
//! envelope, and a `[DONE]` sentinel.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::{CancellationToken, DropGuard};

use lmgate_core::codec::{error_json, success_json};
use lmgate_core::domain::ConversationInfo;
use lmgate_core::ports::{ChannelSink, SinkEvent};

use crate::error::HttpError;
use crate::state::AppState;

/// Header addressing the target conversation.
pub const CONVERSATION_HEADER: &str = "x-conversation-id";

fn bearer_token(headers: &HeaderMap) -> Result<String, HttpError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| HttpError::Unauthorized("Missing bearer token".to_string()))
}

fn conversation_header(headers: &HeaderMap) -> Result<String, HttpError> {
    headers
        .get(CONVERSATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            HttpError::BadRequest(format!("Missing {CONVERSATION_HEADER} header"))
        })
}

// ─────────────────────────────────────────────────────────────────────────
// Chat completions
// ─────────────────────────────────────────────────────────────────────────

/// POST /v1/chat/completions
///
/// The raw body is handed to the dispatcher's codec unchanged; only the
/// `stream` flag is peeked at here.
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, HttpError> {
    let token = bearer_token(&headers)?;
    let conversation_id = conversation_header(&headers)?;
    let stream = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("stream").and_then(Value::as_bool))
        .unwrap_or(false);

    let (sink, rx) = ChannelSink::new();
    let cancel = CancellationToken::new();
    // Dropping the response (client disconnect) cancels the generation.
    let guard = cancel.clone().drop_guard();

    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        dispatcher
            .generate(&token, &conversation_id, &body, sink, cancel)
            .await;
    });

    if stream {
        Ok(sse_response(rx, guard).into_response())
    } else {
        buffered_response(rx, guard).await
    }
}

/// Drain the sink channel into a single JSON response.
async fn buffered_response(
    mut rx: UnboundedReceiver<SinkEvent>,
    _guard: DropGuard,
) -> Result<Response, HttpError> {
    while let Some(event) = rx.recv().await {
        match event {
            SinkEvent::Token(_) => {}
            SinkEvent::Complete(envelope) => {
                let value: Value = serde_json::from_str(&envelope)
                    .map_err(|e| HttpError::Internal(e.to_string()))?;
                return Ok(Json(value).into_response());
            }
            SinkEvent::Error(message) => return Err(HttpError::from_stream_error(&message)),
        }
    }
    Err(HttpError::Internal(
        "generation ended without a terminal event".to_string(),
    ))
}

#[derive(Clone, Copy)]
enum SseStage {
    Live,
    Finishing,
    Ended,
}

struct SseState {
    rx: UnboundedReceiver<SinkEvent>,
    stage: SseStage,
    _guard: DropGuard,
}

/// Bridge sink events into an SSE stream ending with `[DONE]`.
fn sse_response(
    rx: UnboundedReceiver<SinkEvent>,
    guard: DropGuard,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let state = SseState {
        rx,
        stage: SseStage::Live,
        _guard: guard,
    };

    let stream = futures_util::stream::unfold(state, |mut state| async move {
        match state.stage {
            SseStage::Ended => None,
            SseStage::Finishing => {
                state.stage = SseStage::Ended;
                Some((Ok(Event::default().data("[DONE]")), state))
            }
            SseStage::Live => match state.rx.recv().await {
                Some(SinkEvent::Token(delta)) => {
                    let chunk = serde_json::json!({ "delta": delta }).to_string();
                    Some((Ok(Event::default().data(chunk)), state))
                }
                Some(SinkEvent::Complete(envelope)) => {
                    state.stage = SseStage::Finishing;
                    Some((Ok(Event::default().data(envelope)), state))
                }
                Some(SinkEvent::Error(message)) => {
                    state.stage = SseStage::Finishing;
                    Some((Ok(Event::default().data(error_json(&message))), state))
                }
                None => None,
            },
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ─────────────────────────────────────────────────────────────────────────
// Conversation management
// ─────────────────────────────────────────────────────────────────────────

/// Request body for starting a conversation.
#[derive(Debug, Deserialize)]
pub struct StartConversationRequest {
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub ttl_ms: i64,
}

/// POST /v1/conversations
pub async fn start_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StartConversationRequest>,
) -> Result<Json<ConversationInfo>, HttpError> {
    let token = bearer_token(&headers)?;
    let info = state
        .dispatcher
        .start_conversation(&token, req.system_instruction, req.ttl_ms)
        .await?;
    Ok(Json(info))
}

/// GET /v1/conversations/{id}
pub async fn conversation_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ConversationInfo>, HttpError> {
    let token = bearer_token(&headers)?;
    let info = state.dispatcher.conversation_info(&token, &id).await?;
    Ok(Json(info))
}

/// DELETE /v1/conversations/{id}
pub async fn close_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, HttpError> {
    let token = bearer_token(&headers)?;
    state.dispatcher.close_conversation(&token, &id).await?;
    let value: Value =
        serde_json::from_str(&success_json()).map_err(|e| HttpError::Internal(e.to_string()))?;
    Ok(Json(value).into_response())
}

// ─────────────────────────────────────────────────────────────────────────
// Probes
// ─────────────────────────────────────────────────────────────────────────

/// GET /v1/ping
pub async fn ping(State(state): State<AppState>, headers: HeaderMap) -> Result<String, HttpError> {
    let token = bearer_token(&headers)?;
    Ok(state.dispatcher.ping(&token))
}

/// GET /v1/health
pub async fn health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<String, HttpError> {
    let token = bearer_token(&headers)?;
    Ok(state.dispatcher.health(&token))
}

/// GET /v1/load
pub async fn load(State(state): State<AppState>, headers: HeaderMap) -> Result<String, HttpError> {
    let token = bearer_token(&headers)?;
    Ok(state.dispatcher.load(&token).to_string())
}
