//! Route definitions and router construction.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;
use crate::state::AppState;

/// Build the gateway router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/conversations", post(handlers::start_conversation))
        .route(
            "/v1/conversations/{id}",
            get(handlers::conversation_info).delete(handlers::close_conversation),
        )
        .route("/v1/ping", get(handlers::ping))
        .route("/v1/health", get(handlers::health))
        .route("/v1/load", get(handlers::load))
        .layer(cors)
        .with_state(state)
}
