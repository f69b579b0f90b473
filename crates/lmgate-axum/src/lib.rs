//! # lmgate-axum
//!
//! The optional HTTP compatibility surface over the dispatcher, plus the
//! composition root that wires stores, services, and the engine gateway
//! into one process.

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use bootstrap::{GatewayConfig, GatewayContext, bootstrap, start_server};
pub use error::HttpError;
pub use state::AppState;
