//! LLM transport — one outbound streaming chat call to a remote
//! inference endpoint speaking newline-delimited JSON.
//!
//! The transport is deliberately thin: it forwards incremental deltas
//! as-is, surfaces the tool-call block exactly once, forwards usage from
//! the terminal frame, and never retries. Everything above that (tool
//! dispatch, persistence, iteration) belongs to the agent loop.

pub mod cache;
pub mod ndjson;
pub mod traits;

pub use cache::TransportCache;
pub use ndjson::NdjsonTransport;
pub use traits::{ChatRequest, ChatResponse, ChatTransport, ModelParams};
