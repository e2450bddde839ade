//! Turn recorder — the transactional boundary of one agent turn.
//!
//! A recorder owns one database transaction from placeholder creation to
//! FINALIZE. Invocation rows are inserted/updated on the open transaction
//! while the turn streams, so crash recovery observes all-or-nothing of a
//! turn; the single commit happens in `finalize_completed` /
//! `finalize_error`. Dropping the recorder rolls everything back.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use crate::db::Database;
use crate::models::{message_status, tool_status};
use crate::StoreResult;

/// Session figures captured at FINALIZE, pushed with the terminal event.
#[derive(Debug, Clone)]
pub struct TurnTotals {
    pub message_count: i64,
    pub total_tokens: i64,
    pub current_context_tokens: i64,
    pub last_activity_at: DateTime<Utc>,
}

/// Owns the turn's transaction and assigns invocation sequence numbers,
/// monotonically from 1, separately per kind.
pub struct TurnRecorder {
    tx: Transaction<'static, Sqlite>,
    message_id: String,
    session_id: String,
    model_name: String,
    llm_seq: i64,
    tool_seq: i64,
}

impl TurnRecorder {
    /// Open the turn transaction: insert the assistant placeholder in
    /// `pending` (the foreign-key target for invocation rows) and bump
    /// the session's message count.
    pub async fn begin(db: &Database, session_id: &str, model_name: &str) -> StoreResult<Self> {
        let mut tx = db.pool().begin().await?;
        let message_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO chat_messages \
             (message_id, session_id, role, content, status, model_name, created_at) \
             VALUES (?, ?, 'assistant', '', ?, ?, ?)",
        )
        .bind(&message_id)
        .bind(session_id)
        .bind(message_status::PENDING)
        .bind(model_name)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE chat_sessions SET message_count = message_count + 1 WHERE session_id = ?",
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        Ok(Self {
            tx,
            message_id,
            session_id: session_id.to_string(),
            model_name: model_name.to_string(),
            llm_seq: 0,
            tool_seq: 0,
        })
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Record one terminated LLM call. Returns the call's sequence number
    /// and the session's cumulative token count after this call.
    pub async fn record_llm_invocation(
        &mut self,
        prompt_tokens: i64,
        completion_tokens: i64,
        duration_ms: i64,
        finish_reason: Option<&str>,
    ) -> StoreResult<(i64, i64)> {
        self.llm_seq += 1;
        let total = prompt_tokens + completion_tokens;

        sqlx::query(
            "INSERT INTO model_invocations \
             (message_id, session_id, sequence_number, prompt_tokens, completion_tokens, \
              total_tokens, duration_ms, finish_reason, model_name, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.message_id)
        .bind(&self.session_id)
        .bind(self.llm_seq)
        .bind(prompt_tokens)
        .bind(completion_tokens)
        .bind(total)
        .bind(duration_ms)
        .bind(finish_reason)
        .bind(&self.model_name)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await?;

        sqlx::query("UPDATE chat_sessions SET total_tokens = total_tokens + ? WHERE session_id = ?")
            .bind(total)
            .bind(&self.session_id)
            .execute(&mut *self.tx)
            .await?;

        let (session_total,): (i64,) =
            sqlx::query_as("SELECT total_tokens FROM chat_sessions WHERE session_id = ?")
                .bind(&self.session_id)
                .fetch_one(&mut *self.tx)
                .await?;

        Ok((self.llm_seq, session_total))
    }

    /// Insert a tool invocation in `pending` at dispatch time. Returns
    /// its sequence number.
    pub async fn insert_tool_invocation(
        &mut self,
        triggered_by_llm_sequence: i64,
        tool_name: &str,
        arguments: &Value,
    ) -> StoreResult<i64> {
        self.tool_seq += 1;

        sqlx::query(
            "INSERT INTO tool_invocations \
             (message_id, session_id, sequence_number, triggered_by_llm_sequence, \
              tool_name, arguments, status, cache_hit, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&self.message_id)
        .bind(&self.session_id)
        .bind(self.tool_seq)
        .bind(triggered_by_llm_sequence)
        .bind(tool_name)
        .bind(serde_json::to_string(arguments)?)
        .bind(tool_status::PENDING)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await?;

        Ok(self.tool_seq)
    }

    /// Update a pending tool row to `success`. Called exactly once per row.
    pub async fn complete_tool_invocation(
        &mut self,
        sequence_number: i64,
        result: &Value,
        cache_hit: bool,
        duration_ms: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE tool_invocations \
             SET status = ?, result = ?, cache_hit = ?, duration_ms = ? \
             WHERE message_id = ? AND sequence_number = ?",
        )
        .bind(tool_status::SUCCESS)
        .bind(serde_json::to_string(result)?)
        .bind(cache_hit)
        .bind(duration_ms)
        .bind(&self.message_id)
        .bind(sequence_number)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Update a pending tool row to `error`. Called exactly once per row.
    pub async fn fail_tool_invocation(
        &mut self,
        sequence_number: i64,
        error_message: &str,
        duration_ms: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE tool_invocations \
             SET status = ?, error_message = ?, duration_ms = ? \
             WHERE message_id = ? AND sequence_number = ?",
        )
        .bind(tool_status::ERROR)
        .bind(error_message)
        .bind(duration_ms)
        .bind(&self.message_id)
        .bind(sequence_number)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Commit a successful turn: write the placeholder's final content and
    /// token figures, recompute the session's context-token count, and
    /// commit everything at once.
    #[allow(clippy::too_many_arguments)]
    pub async fn finalize_completed(
        self,
        content: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
        generation_time: f64,
        timeline: Option<&str>,
    ) -> StoreResult<TurnTotals> {
        self.finalize(
            message_status::COMPLETED,
            content,
            prompt_tokens,
            completion_tokens,
            generation_time,
            timeline,
        )
        .await
    }

    /// Commit a failed turn: the placeholder moves to `error`, keeping the
    /// partial content and whatever invocation rows the turn produced.
    pub async fn finalize_error(
        self,
        content: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
        generation_time: f64,
        timeline: Option<&str>,
    ) -> StoreResult<TurnTotals> {
        self.finalize(
            message_status::ERROR,
            content,
            prompt_tokens,
            completion_tokens,
            generation_time,
            timeline,
        )
        .await
    }

    async fn finalize(
        mut self,
        status: &str,
        content: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
        generation_time: f64,
        timeline: Option<&str>,
    ) -> StoreResult<TurnTotals> {
        let total_tokens = prompt_tokens + completion_tokens;
        let now = Utc::now();

        sqlx::query(
            "UPDATE chat_messages SET \
             content = ?, status = ?, prompt_tokens = ?, completion_tokens = ?, \
             total_tokens = ?, generation_time = ?, timeline = ? \
             WHERE message_id = ?",
        )
        .bind(content)
        .bind(status)
        .bind(prompt_tokens)
        .bind(completion_tokens)
        .bind(total_tokens)
        .bind(generation_time)
        .bind(timeline)
        .bind(&self.message_id)
        .execute(&mut *self.tx)
        .await?;

        // Context figure for the next turn: the latest non-deleted
        // assistant message's total_tokens (the row just updated, unless
        // a concurrent turn finished later).
        let (context_tokens,): (Option<i64>,) = sqlx::query_as(
            "SELECT total_tokens FROM chat_messages \
             WHERE session_id = ? AND is_deleted = 0 AND role = 'assistant' \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(&self.session_id)
        .fetch_one(&mut *self.tx)
        .await?;
        let context_tokens = context_tokens.unwrap_or(0);

        sqlx::query(
            "UPDATE chat_sessions SET current_context_tokens = ?, last_activity_at = ? \
             WHERE session_id = ?",
        )
        .bind(context_tokens)
        .bind(now)
        .bind(&self.session_id)
        .execute(&mut *self.tx)
        .await?;

        let (message_count, total): (i64, i64) = sqlx::query_as(
            "SELECT message_count, total_tokens FROM chat_sessions WHERE session_id = ?",
        )
        .bind(&self.session_id)
        .fetch_one(&mut *self.tx)
        .await?;

        self.tx.commit().await?;

        Ok(TurnTotals {
            message_count,
            total_tokens: total,
            current_context_tokens: context_tokens,
            last_activity_at: now,
        })
    }

    /// Roll the turn back explicitly (dropping the recorder does the same).
    pub async fn abort(self) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
