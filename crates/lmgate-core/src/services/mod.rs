//! Core services: token store, conversation registry, and the dispatcher.

pub mod dispatcher;
pub mod registry;
pub mod token_store;

pub use dispatcher::{
    CONVERSATION_ERROR, DispatchError, Dispatcher, EMPTY_MESSAGES_ERROR, INVALID_TOKEN_ERROR,
    PENDING_USER_APPROVAL,
};
pub use registry::ConversationRegistry;
pub use token_store::TokenStore;
