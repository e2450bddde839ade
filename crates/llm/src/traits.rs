use parley_domain::error::Result;
use parley_domain::message::{PromptMessage, ToolDefinition};
use parley_domain::stream::{BoxStream, RawFrame, TokenUsage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sampling parameters taken from the session/model configuration.
#[derive(Debug, Clone, Default)]
pub struct ModelParams {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// A transport-agnostic chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The prompt window, oldest first.
    pub messages: Vec<PromptMessage>,
    /// Tool definitions the model may invoke (empty = no tools offered).
    pub tools: Vec<ToolDefinition>,
    pub params: ModelParams,
}

/// A non-streaming chat response (used for summaries and titles).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait implemented by every chat transport.
///
/// Contracts the agent loop relies on:
/// - content deltas are incremental, never accumulated by the transport;
/// - the tool-call block is surfaced at most once per stream, before the
///   terminal frame;
/// - usage counters from the terminal frame are always forwarded;
/// - the transport never retries.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a streaming chat call and return the raw frame sequence.
    async fn stream_chat(&self, req: ChatRequest)
        -> Result<BoxStream<'static, Result<RawFrame>>>;

    /// One-shot non-streaming chat call.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// The model identifier this transport is bound to.
    fn model_id(&self) -> &str;
}
