//! Shared types for the Parley gateway: canonical events, raw LLM frames,
//! prompt messages, wire codes, configuration, and the error taxonomy.
//!
//! Every other crate in the workspace depends on this one; it depends on
//! nothing but serde and friends.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod stream;
pub mod wire;

pub use error::{Error, Result};
