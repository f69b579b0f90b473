//! # lmgate-engine
//!
//! The engine gateway: serialized access to the singleton native LLM
//! runtime, the active-binding reuse policy, and the streaming generation
//! protocol. The native runtime itself is external; it plugs in through
//! the [`lmgate_core::ports::EngineLoader`] port. The [`mock`] module
//! provides a scripted engine for tests and local development.

mod gateway;
mod loader;
pub mod mock;

pub use gateway::EngineGateway;
