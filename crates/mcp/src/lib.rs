//! In-process MCP tool hub.
//!
//! The agent loop is the JSON-RPC 2.0 client; each registered
//! [`ToolServer`] is a named collection of tools. The hub validates
//! arguments against declared schemas before dispatch, resolves duplicate
//! tool names by registration order, and consults an optional result
//! cache for tools that declare themselves cacheable.

pub mod builtin;
pub mod hub;
pub mod protocol;
pub mod schema;
pub mod server;

pub use hub::{ToolCallOutcome, ToolHub, ToolResultCache};
pub use protocol::{McpToolDef, ToolCallContent, ToolCallResult};
pub use server::ToolServer;
