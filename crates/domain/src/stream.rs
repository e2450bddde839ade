use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One raw frame decoded from the LLM's newline-delimited stream.
///
/// Content deltas are incremental, never cumulative — the transport
/// forwards each line's text piece as-is. The tool-call block appears at
/// most once per stream, in the penultimate frame; usage counters arrive
/// on the terminal frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawFrame {
    /// An incremental text piece from the assistant.
    MessageDelta { content: String },

    /// The complete tool-call block, surfaced exactly once.
    ToolCallBlock { calls: Vec<RawToolCall> },

    /// Token usage from the terminal frame.
    Usage(TokenUsage),

    /// End of stream.
    Done { finish_reason: Option<String> },
}

/// A single requested tool call as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Token usage for one LLM call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// True when the endpoint served the prompt from its KV cache.
    pub prompt_cache_hit: bool,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}
