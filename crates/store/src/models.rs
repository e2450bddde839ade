//! Row types for the relational store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ── Status string constants ────────────────────────────────────────
// Stored as TEXT; kept as constants rather than enums so rows stay
// directly FromRow-able.

pub mod session_status {
    pub const ACTIVE: &str = "active";
    pub const DELETED: &str = "deleted";
}

pub mod message_status {
    pub const PENDING: &str = "pending";
    pub const COMPLETED: &str = "completed";
    pub const ERROR: &str = "error";
}

pub mod tool_status {
    pub const PENDING: &str = "pending";
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct AiModelRow {
    pub id: i64,
    pub model_id: String,
    pub provider: String,
    pub base_url: String,
    pub display_name: String,
    pub max_context_length: i64,
    pub supports_streaming: bool,
    pub supports_tools: bool,
    pub is_active: bool,
    pub display_order: i64,
}

#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct SessionRow {
    pub session_id: String,
    pub user_id: i64,
    pub title: String,
    pub ai_model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    pub system_prompt: Option<String>,
    pub current_context_tokens: i64,
    pub total_tokens: i64,
    pub message_count: i64,
    pub last_activity_at: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl SessionRow {
    pub fn is_deleted(&self) -> bool {
        self.status == session_status::DELETED
    }
}

#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct MessageRow {
    pub message_id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub parent_message_id: Option<String>,
    pub status: String,
    pub model_name: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub generation_time: Option<f64>,
    /// JSON-encoded timeline of thinking/tool/content entries.
    pub timeline: Option<String>,
    pub is_deleted: bool,
    pub is_edited: bool,
    pub is_summarized: bool,
    pub is_summary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct LlmInvocationRow {
    pub id: i64,
    pub message_id: String,
    pub session_id: String,
    pub sequence_number: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub duration_ms: i64,
    pub finish_reason: Option<String>,
    pub model_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct ToolInvocationRow {
    pub id: i64,
    pub message_id: String,
    pub session_id: String,
    pub sequence_number: i64,
    pub triggered_by_llm_sequence: Option<i64>,
    pub tool_name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
    /// JSON-encoded result, or NULL while pending / on error.
    pub result: Option<String>,
    pub status: String,
    pub cache_hit: bool,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Write payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fields accepted when creating a session.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewSession {
    pub title: Option<String>,
    pub ai_model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
}

/// Fields accepted when patching a session.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub ai_model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.ai_model.is_none()
            && self.system_prompt.is_none()
            && self.temperature.is_none()
            && self.max_tokens.is_none()
    }
}
