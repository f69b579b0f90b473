//! HTTP error mapping.
//!
//! Every failure renders as the gateway's `{"error": …}` envelope. The
//! status mapping deliberately reports foreign conversations as plain 404s;
//! existence is never disclosed to a caller that does not own the record.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use lmgate_core::services::{CONVERSATION_ERROR, DispatchError, INVALID_TOKEN_ERROR};

/// HTTP-surface error type.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl HttpError {
    /// Classify a sink error string from the streaming path.
    #[must_use]
    pub fn from_stream_error(message: &str) -> Self {
        if message == INVALID_TOKEN_ERROR {
            Self::Unauthorized(message.to_string())
        } else if message == CONVERSATION_ERROR {
            Self::NotFound(message.to_string())
        } else if message == "Model not loaded" {
            Self::ServiceUnavailable(message.to_string())
        } else if message.starts_with("Malformed request")
            || message.starts_with("Invalid message role")
            || message == "No messages provided"
        {
            Self::BadRequest(message.to_string())
        } else {
            Self::Internal(message.to_string())
        }
    }
}

impl From<DispatchError> for HttpError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidToken => Self::Unauthorized(err.to_string()),
            DispatchError::Conversation => Self::NotFound(err.to_string()),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self {
            HttpError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_errors_classify_by_message() {
        assert!(matches!(
            HttpError::from_stream_error(INVALID_TOKEN_ERROR),
            HttpError::Unauthorized(_)
        ));
        assert!(matches!(
            HttpError::from_stream_error(CONVERSATION_ERROR),
            HttpError::NotFound(_)
        ));
        assert!(matches!(
            HttpError::from_stream_error("No messages provided"),
            HttpError::BadRequest(_)
        ));
        assert!(matches!(
            HttpError::from_stream_error("Engine failure: oom"),
            HttpError::Internal(_)
        ));
    }
}
