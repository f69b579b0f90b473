//! Translation between on-the-wire JSON and domain types.

pub mod envelope;
pub mod request;

pub use envelope::{
    AssistantMessage, ChatChoice, ChatCompletion, DEFAULT_MODEL_NAME, Usage, completion_envelope,
    completion_json, error_json, success_json,
};
pub use request::{ChatRequest, decode_chat_request, encode_content_part};
