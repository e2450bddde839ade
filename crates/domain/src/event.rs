//! Canonical events — the normalized in-memory unit flowing from the
//! agent loop to the stream gateway.
//!
//! Within one turn, events are emitted in a fixed order: content/thinking
//! deltas in receipt order, then tool calls in block order, then the
//! invocation-complete marker, repeated per iteration, ending with a
//! single terminal `done` (or one `error` followed by `done`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context figures pushed with the terminal `done` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextInfo {
    pub current_context_tokens: u64,
    pub max_context_tokens: u64,
}

/// Session statistics pushed with the terminal `done` event so the client
/// can update its session list without an extra request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub message_count: i64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub last_activity_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Events emitted during a single agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    /// The assistant placeholder was created and generation is starting.
    TurnStarted { message_id: String },

    /// Incremental final-visible text from the assistant.
    ContentDelta { delta: String },

    /// A `<think>` block opened.
    ThinkingBegin { thinking_id: String },

    /// Incremental text inside the current `<think>` block.
    ThinkingDelta { thinking_id: String, delta: String },

    /// The current `<think>` block closed.
    ThinkingEnd { thinking_id: String },

    /// The model requested a tool invocation.
    ToolCall {
        tool_id: String,
        name: String,
        args: Value,
    },

    /// A tool invocation finished.
    ToolResult {
        tool_id: String,
        name: String,
        result: Value,
        cache_hit: bool,
        is_error: bool,
    },

    /// One outbound LLM call terminated; its telemetry row is recorded.
    LlmInvocationComplete {
        sequence: i64,
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
        duration_ms: u64,
        finish_reason: Option<String>,
        /// Cumulative token count for the session after this call.
        session_total_tokens: u64,
        context_usage_percent: f64,
    },

    /// Aggregate usage for the whole turn.
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
    },

    /// The background title job finished.
    SessionTitleUpdated { session_id: String, title: String },

    /// Non-fatal notice (e.g. the turn was stopped by the user).
    Info { kind: String },

    /// The turn failed; `kind` is the stable taxonomy string.
    Error { kind: String, message: String },

    /// Terminal event of every turn, success or failure.
    Done {
        message_id: String,
        status: i32,
        generation_time: f64,
        context_info: ContextInfo,
        session_info: SessionInfo,
    },
}

impl CanonicalEvent {
    /// Short name used in spans and debug logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CanonicalEvent::TurnStarted { .. } => "turn_started",
            CanonicalEvent::ContentDelta { .. } => "content_delta",
            CanonicalEvent::ThinkingBegin { .. } => "thinking_begin",
            CanonicalEvent::ThinkingDelta { .. } => "thinking_delta",
            CanonicalEvent::ThinkingEnd { .. } => "thinking_end",
            CanonicalEvent::ToolCall { .. } => "tool_call",
            CanonicalEvent::ToolResult { .. } => "tool_result",
            CanonicalEvent::LlmInvocationComplete { .. } => "llm_invocation_complete",
            CanonicalEvent::Usage { .. } => "usage",
            CanonicalEvent::SessionTitleUpdated { .. } => "session_title_updated",
            CanonicalEvent::Info { .. } => "info",
            CanonicalEvent::Error { .. } => "error",
            CanonicalEvent::Done { .. } => "done",
        }
    }
}
