//! Typed relational facade over sessions, messages, users, and the
//! model catalog.
//!
//! Timestamps are always bound from Rust so every stored value shares one
//! encoding and `created_at` ordering stays lexicographically correct.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::Database;
use crate::models::{
    message_status, session_status, AiModelRow, MessageRow, NewSession, SessionPatch, SessionRow,
    UserRow,
};
use crate::StoreResult;

/// Facade over the relational store. Cloning shares the pool.
#[derive(Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Users
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn get_user(&self, user_id: i64) -> StoreResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row)
    }

    /// Look up a user by email, creating an active `user`-role row on
    /// first login.
    pub async fn get_or_create_user(&self, email: &str) -> StoreResult<UserRow> {
        if let Some(user) =
            sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(self.db.pool())
                .await?
        {
            return Ok(user);
        }

        sqlx::query("INSERT INTO users (email, role, is_active, created_at) VALUES (?, 'user', 1, ?)")
            .bind(email)
            .bind(Utc::now())
            .execute(self.db.pool())
            .await?;

        let user = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(self.db.pool())
            .await?;
        Ok(user)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Model catalog
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn list_models(&self) -> StoreResult<Vec<AiModelRow>> {
        let rows = sqlx::query_as::<_, AiModelRow>(
            "SELECT * FROM ai_models WHERE is_active = 1 ORDER BY display_order, model_id",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn get_model(&self, model_id: &str) -> StoreResult<Option<AiModelRow>> {
        let row = sqlx::query_as::<_, AiModelRow>(
            "SELECT * FROM ai_models WHERE model_id = ? AND is_active = 1",
        )
        .bind(model_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Sessions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn create_session(&self, user_id: i64, new: NewSession) -> StoreResult<SessionRow> {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO chat_sessions \
             (session_id, user_id, title, ai_model, temperature, max_tokens, system_prompt, \
              current_context_tokens, total_tokens, message_count, last_activity_at, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, 0, ?, ?, ?)",
        )
        .bind(&session_id)
        .bind(user_id)
        .bind(new.title.as_deref().unwrap_or("New chat"))
        .bind(&new.ai_model)
        .bind(new.temperature)
        .bind(new.max_tokens)
        .bind(&new.system_prompt)
        .bind(now)
        .bind(session_status::ACTIVE)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        self.get_session_any_status(&session_id)
            .await?
            .ok_or_else(|| crate::StoreError::Invalid("session vanished after insert".into()))
    }

    async fn get_session_any_status(&self, session_id: &str) -> StoreResult<Option<SessionRow>> {
        let row =
            sqlx::query_as::<_, SessionRow>("SELECT * FROM chat_sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row)
    }

    /// Fetch a non-deleted session owned by the given user.
    pub async fn get_session(
        &self,
        session_id: &str,
        user_id: i64,
    ) -> StoreResult<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM chat_sessions \
             WHERE session_id = ? AND user_id = ? AND status != ?",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(session_status::DELETED)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Cursor-paginated session list, newest activity first. The cursor is
    /// the `last_activity_at` of the previous page's final row.
    pub async fn list_sessions(
        &self,
        user_id: i64,
        cursor: Option<DateTime<Utc>>,
        limit: i64,
    ) -> StoreResult<Vec<SessionRow>> {
        let rows = match cursor {
            Some(before) => {
                sqlx::query_as::<_, SessionRow>(
                    "SELECT * FROM chat_sessions \
                     WHERE user_id = ? AND status != ? AND last_activity_at < ? \
                     ORDER BY last_activity_at DESC LIMIT ?",
                )
                .bind(user_id)
                .bind(session_status::DELETED)
                .bind(before)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, SessionRow>(
                    "SELECT * FROM chat_sessions \
                     WHERE user_id = ? AND status != ? \
                     ORDER BY last_activity_at DESC LIMIT ?",
                )
                .bind(user_id)
                .bind(session_status::DELETED)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn update_session(
        &self,
        session_id: &str,
        user_id: i64,
        patch: SessionPatch,
    ) -> StoreResult<Option<SessionRow>> {
        let Some(session) = self.get_session(session_id, user_id).await? else {
            return Ok(None);
        };

        sqlx::query(
            "UPDATE chat_sessions SET \
             title = ?, ai_model = ?, system_prompt = ?, temperature = ?, max_tokens = ? \
             WHERE session_id = ?",
        )
        .bind(patch.title.unwrap_or(session.title))
        .bind(patch.ai_model.or(session.ai_model))
        .bind(patch.system_prompt.or(session.system_prompt))
        .bind(patch.temperature.or(session.temperature))
        .bind(patch.max_tokens.or(session.max_tokens))
        .bind(session_id)
        .execute(self.db.pool())
        .await?;

        self.get_session(session_id, user_id).await
    }

    /// Soft delete. Deleted sessions are never mutated again by the core.
    pub async fn soft_delete_session(&self, session_id: &str, user_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET status = ? \
             WHERE session_id = ? AND user_id = ? AND status != ?",
        )
        .bind(session_status::DELETED)
        .bind(session_id)
        .bind(user_id)
        .bind(session_status::DELETED)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_session_title(&self, session_id: &str, title: &str) -> StoreResult<()> {
        sqlx::query("UPDATE chat_sessions SET title = ? WHERE session_id = ? AND status != ?")
            .bind(title)
            .bind(session_id)
            .bind(session_status::DELETED)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Messages
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Insert a completed message (user turns, summaries). Bumps the
    /// session's message count and activity timestamp.
    pub async fn create_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        parent_message_id: Option<&str>,
    ) -> StoreResult<MessageRow> {
        let message_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO chat_messages \
             (message_id, session_id, role, content, parent_message_id, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message_id)
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(parent_message_id)
        .bind(message_status::COMPLETED)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        sqlx::query(
            "UPDATE chat_sessions SET message_count = message_count + 1, last_activity_at = ? \
             WHERE session_id = ?",
        )
        .bind(now)
        .bind(session_id)
        .execute(self.db.pool())
        .await?;

        self.get_message(&message_id)
            .await?
            .ok_or_else(|| crate::StoreError::Invalid("message vanished after insert".into()))
    }

    pub async fn get_message(&self, message_id: &str) -> StoreResult<Option<MessageRow>> {
        let row =
            sqlx::query_as::<_, MessageRow>("SELECT * FROM chat_messages WHERE message_id = ?")
                .bind(message_id)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row)
    }

    /// Non-deleted messages of a session, oldest first.
    pub async fn list_messages(
        &self,
        session_id: &str,
        limit: Option<i64>,
    ) -> StoreResult<Vec<MessageRow>> {
        let limit = limit.unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM chat_messages \
             WHERE session_id = ? AND is_deleted = 0 \
             ORDER BY created_at LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// The prompt-window source set: non-deleted, non-summarized,
    /// non-summary messages in `created_at` order.
    pub async fn effective_messages(&self, session_id: &str) -> StoreResult<Vec<MessageRow>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM chat_messages \
             WHERE session_id = ? AND is_deleted = 0 AND is_summarized = 0 AND is_summary = 0 \
             ORDER BY created_at, rowid",
        )
        .bind(session_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Latest non-deleted summary message, if any.
    pub async fn latest_summary(&self, session_id: &str) -> StoreResult<Option<MessageRow>> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM chat_messages \
             WHERE session_id = ? AND is_summary = 1 AND is_deleted = 0 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// `total_tokens` of the latest non-deleted assistant message, or 0.
    pub async fn latest_assistant_total_tokens(&self, session_id: &str) -> StoreResult<i64> {
        let tokens: Option<(Option<i64>,)> = sqlx::query_as(
            "SELECT total_tokens FROM chat_messages \
             WHERE session_id = ? AND is_deleted = 0 AND role = 'assistant' \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(tokens.and_then(|t| t.0).unwrap_or(0))
    }

    pub async fn soft_delete_message(&self, message_id: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE chat_messages SET is_deleted = 1 WHERE message_id = ?")
                .bind(message_id)
                .execute(self.db.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a message and everything after it (edit cascade).
    pub async fn soft_delete_message_and_after(
        &self,
        session_id: &str,
        message_id: &str,
        from: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE chat_messages SET is_deleted = 1 \
             WHERE session_id = ? AND is_deleted = 0 \
               AND (created_at > ? OR message_id = ?)",
        )
        .bind(session_id)
        .bind(from)
        .bind(message_id)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Clear `is_summarized` on every message at or before `up_to`
    /// (edit of an already-summarized message restores its history).
    pub async fn restore_summarized_until(
        &self,
        session_id: &str,
        up_to: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE chat_messages SET is_summarized = 0 \
             WHERE session_id = ? AND is_summarized = 1 AND created_at <= ?",
        )
        .bind(session_id)
        .bind(up_to)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Mark a set of messages as folded into a summary.
    pub async fn mark_summarized(&self, message_ids: &[String]) -> StoreResult<()> {
        for id in message_ids {
            sqlx::query("UPDATE chat_messages SET is_summarized = 1 WHERE message_id = ?")
                .bind(id)
                .execute(self.db.pool())
                .await?;
        }
        Ok(())
    }

    /// Insert a summary message (`role=system`, `is_summary=1`).
    pub async fn create_summary_message(
        &self,
        session_id: &str,
        content: &str,
    ) -> StoreResult<MessageRow> {
        let message_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO chat_messages \
             (message_id, session_id, role, content, status, is_summary, created_at) \
             VALUES (?, ?, 'system', ?, ?, 1, ?)",
        )
        .bind(&message_id)
        .bind(session_id)
        .bind(content)
        .bind(message_status::COMPLETED)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        self.get_message(&message_id)
            .await?
            .ok_or_else(|| crate::StoreError::Invalid("summary vanished after insert".into()))
    }

    /// Flag a message as edited (provenance for edit-then-resend).
    pub async fn mark_edited(&self, message_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE chat_messages SET is_edited = 1 WHERE message_id = ?")
            .bind(message_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Store {
        Store::new(Database::connect_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn seed_user_and_model_exist() {
        let store = store().await;
        let user = store.get_user(1).await.unwrap().unwrap();
        assert!(user.is_active);
        let models = store.list_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_id, "qwen3:8b");
        assert_eq!(models[0].max_context_length, 32768);
    }

    #[tokio::test]
    async fn session_crud_and_soft_delete() {
        let store = store().await;
        let session = store
            .create_session(
                1,
                NewSession {
                    title: Some("demo".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(session.title, "demo");
        assert_eq!(session.message_count, 0);

        let fetched = store.get_session(&session.session_id, 1).await.unwrap();
        assert!(fetched.is_some());

        // Wrong owner sees nothing.
        assert!(store.get_session(&session.session_id, 99).await.unwrap().is_none());

        assert!(store.soft_delete_session(&session.session_id, 1).await.unwrap());
        assert!(store.get_session(&session.session_id, 1).await.unwrap().is_none());
        // Second delete is a no-op.
        assert!(!store.soft_delete_session(&session.session_id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn list_sessions_pagination() {
        let store = store().await;
        for i in 0..3 {
            store
                .create_session(
                    1,
                    NewSession {
                        title: Some(format!("s{i}")),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            // Distinct activity timestamps.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let page1 = store.list_sessions(1, None, 2).await.unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].title, "s2"); // newest first

        let cursor = page1.last().unwrap().last_activity_at;
        let page2 = store.list_sessions(1, Some(cursor), 2).await.unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].title, "s0");
    }

    #[tokio::test]
    async fn message_creation_bumps_count_and_activity() {
        let store = store().await;
        let session = store.create_session(1, NewSession::default()).await.unwrap();

        store
            .create_message(&session.session_id, "user", "hello", None)
            .await
            .unwrap();

        let session = store.get_session(&session.session_id, 1).await.unwrap().unwrap();
        assert_eq!(session.message_count, 1);
    }

    #[tokio::test]
    async fn effective_messages_exclude_summarized_and_summaries() {
        let store = store().await;
        let session = store.create_session(1, NewSession::default()).await.unwrap();
        let sid = session.session_id.clone();

        let m1 = store.create_message(&sid, "user", "old", None).await.unwrap();
        let m2 = store.create_message(&sid, "assistant", "old reply", None).await.unwrap();
        store.create_message(&sid, "user", "new", None).await.unwrap();

        store
            .mark_summarized(&[m1.message_id.clone(), m2.message_id.clone()])
            .await
            .unwrap();
        store.create_summary_message(&sid, "summary of old").await.unwrap();

        let effective = store.effective_messages(&sid).await.unwrap();
        let contents: Vec<_> = effective.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["new"]);

        let summary = store.latest_summary(&sid).await.unwrap().unwrap();
        assert_eq!(summary.content, "summary of old");
        assert_eq!(summary.role, "system");
        assert!(summary.is_summary);
    }

    #[tokio::test]
    async fn latest_assistant_total_tokens_defaults_to_zero() {
        let store = store().await;
        let session = store.create_session(1, NewSession::default()).await.unwrap();
        assert_eq!(
            store.latest_assistant_total_tokens(&session.session_id).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn edit_cascade_soft_deletes_following_messages() {
        let store = store().await;
        let session = store.create_session(1, NewSession::default()).await.unwrap();
        let sid = session.session_id.clone();

        store.create_message(&sid, "user", "u1", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let u2 = store.create_message(&sid, "user", "u2", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create_message(&sid, "assistant", "a2", None).await.unwrap();

        let deleted = store
            .soft_delete_message_and_after(&sid, &u2.message_id, u2.created_at)
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let remaining = store.list_messages(&sid, None).await.unwrap();
        let contents: Vec<_> = remaining.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["u1"]);
    }
}
