//! Context manager — prompt-window assembly, summarization, and edit
//! provenance.
//!
//! The window for one turn is {latest summary, if any} followed by every
//! non-deleted, non-summarized message in `created_at` order. When the
//! session's context-token figure crosses the threshold fraction of the
//! model's window, everything older than the most recent few messages is
//! collapsed into one system summary message. Summarization is
//! single-flight per session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use parley_domain::config::ContextConfig;
use parley_domain::error::{Error, Result};
use parley_domain::message::PromptMessage;
use parley_llm::{ChatRequest, ChatTransport};
use parley_store::models::{AiModelRow, MessageRow, SessionRow};
use parley_store::{KvStore, Store};

pub struct ContextManager {
    store: Store,
    kv: Arc<KvStore>,
    config: ContextConfig,
    /// Per-session single-flight guard for summarization.
    summarize_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ContextManager {
    pub fn new(store: Store, kv: Arc<KvStore>, config: ContextConfig) -> Self {
        Self {
            store,
            kv,
            config,
            summarize_locks: Mutex::new(HashMap::new()),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Window assembly
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// The ordered prompt window: latest summary (if any) followed by all
    /// effective messages. The pending assistant placeholder never
    /// appears here — it lives in the turn's uncommitted transaction.
    pub async fn build_window(&self, session: &SessionRow) -> Result<Vec<MessageRow>> {
        let mut window = Vec::new();
        if let Some(summary) = self
            .store
            .latest_summary(&session.session_id)
            .await
            .map_err(parley_domain::Error::from)?
        {
            window.push(summary);
        }
        window.extend(
            self.store
                .effective_messages(&session.session_id)
                .await
                .map_err(parley_domain::Error::from)?,
        );
        Ok(window)
    }

    /// True when the session's context figure has crossed the threshold
    /// fraction of the model's window.
    pub fn should_summarize(&self, session: &SessionRow, model: &AiModelRow) -> bool {
        let threshold =
            (model.max_context_length as f64 * self.config.summarize_threshold) as i64;
        session.current_context_tokens >= threshold
    }

    /// `total_tokens` of the latest non-deleted assistant message, or 0.
    pub async fn recompute_context_tokens(&self, session_id: &str) -> Result<i64> {
        Ok(self
            .store
            .latest_assistant_total_tokens(session_id)
            .await
            .map_err(parley_domain::Error::from)?)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Summarization
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn lock_for(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        self.summarize_locks
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Collapse everything older than the most recent few messages into
    /// one system summary message.
    ///
    /// `exclude_message_id` names the in-flight user message so it never
    /// counts against the kept window — the prompt then reads
    /// {summary, recent messages, new user text}.
    ///
    /// Idempotent per session: a per-session lock serializes concurrent
    /// callers, and the second caller finds nothing left to summarize.
    pub async fn summarize(
        &self,
        session: &SessionRow,
        transport: &dyn ChatTransport,
        exclude_message_id: Option<&str>,
    ) -> Result<Option<MessageRow>> {
        let lock = self.lock_for(&session.session_id);
        let _guard = lock.lock().await;

        let mut effective = self
            .store
            .effective_messages(&session.session_id)
            .await
            .map_err(parley_domain::Error::from)?;
        if let Some(exclude) = exclude_message_id {
            effective.retain(|m| m.message_id != exclude);
        }
        if effective.len() <= self.config.keep_recent_messages {
            tracing::debug!(
                session_id = %session.session_id,
                messages = effective.len(),
                "nothing to summarize"
            );
            return Ok(None);
        }

        let split = effective.len() - self.config.keep_recent_messages;
        let to_summarize = &effective[..split];

        let prompt = self.summary_prompt(to_summarize);
        let response = transport
            .chat(ChatRequest {
                messages: vec![PromptMessage::user(prompt)],
                tools: vec![],
                params: parley_llm::ModelParams {
                    temperature: Some(0.1),
                    max_tokens: Some(1024),
                },
            })
            .await?;

        let summary_text = response.content.trim().to_string();
        if summary_text.is_empty() {
            return Err(Error::Other("summarizer returned empty text".into()));
        }

        let summary = self
            .store
            .create_summary_message(&session.session_id, &summary_text)
            .await
            .map_err(parley_domain::Error::from)?;
        let ids: Vec<String> = to_summarize.iter().map(|m| m.message_id.clone()).collect();
        self.store
            .mark_summarized(&ids)
            .await
            .map_err(parley_domain::Error::from)?;

        self.kv.save_session_summary(
            &session.session_id,
            &summary_text,
            Duration::from_secs(self.config.summary_cache_ttl_secs),
        );

        tracing::info!(
            session_id = %session.session_id,
            folded = ids.len(),
            summary_len = summary_text.len(),
            "history summarized"
        );
        Ok(Some(summary))
    }

    fn summary_prompt(&self, messages: &[MessageRow]) -> String {
        let mut conversation = String::new();
        for msg in messages {
            conversation.push_str(&msg.role);
            conversation.push_str(": ");
            // Cap very long entries (tool results) so the prompt stays small.
            if msg.content.len() > 2000 {
                let mut end = 1000;
                while !msg.content.is_char_boundary(end) {
                    end -= 1;
                }
                conversation.push_str(&msg.content[..end]);
                conversation.push_str(" […]");
            } else {
                conversation.push_str(&msg.content);
            }
            conversation.push('\n');
        }

        format!(
            "Summarize the following conversation so it can replace the raw \
             history in future prompts. Preserve the topics discussed, the \
             conclusions reached, and any important facts about the user. \
             Stay under {} words.\n\nCONVERSATION:\n{}",
            self.config.summary_max_words, conversation
        )
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Message editing
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Edit provenance cascade: soft-delete the edited message and
    /// everything after it. If the message had already been folded into a
    /// summary, restore its summarized predecessors and drop the summary.
    /// No new message is created — the client POSTs a fresh user turn.
    pub async fn edit_message(&self, message: &MessageRow) -> Result<()> {
        if message.is_summarized {
            self.store
                .restore_summarized_until(&message.session_id, message.created_at)
                .await
                .map_err(parley_domain::Error::from)?;
            if let Some(summary) = self
                .store
                .latest_summary(&message.session_id)
                .await
                .map_err(parley_domain::Error::from)?
            {
                self.store
                    .soft_delete_message(&summary.message_id)
                    .await
                    .map_err(parley_domain::Error::from)?;
            }
            self.kv.delete_session_summary(&message.session_id);
        }

        self.store
            .soft_delete_message_and_after(
                &message.session_id,
                &message.message_id,
                message.created_at,
            )
            .await
            .map_err(parley_domain::Error::from)?;
        self.store
            .mark_edited(&message.message_id)
            .await
            .map_err(parley_domain::Error::from)?;
        Ok(())
    }

    /// Clear the KV summary mirror (called on every successful finalize).
    pub fn clear_summary_cache(&self, session_id: &str) {
        self.kv.delete_session_summary(session_id);
    }
}
