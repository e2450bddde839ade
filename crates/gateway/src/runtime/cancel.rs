//! Per-turn cancellation flags.
//!
//! Each running turn registers a `CancelToken` keyed by
//! `user_id:session_id`. The WebSocket reader sets it on
//! `stop_generation`; the turn loop samples it at every await point and
//! finalizes with the partial content already accumulated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation flag checked by the turn loop.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Tracks active cancellation tokens per `user_id:session_id` pair.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

fn key(user_id: i64, session_id: &str) -> String {
    format!("{user_id}:{session_id}")
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a token for a running turn.
    pub fn register(&self, user_id: i64, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(key(user_id, session_id), token.clone());
        token
    }

    /// Signal the turn on this session to stop. Returns true if a turn
    /// was running.
    pub fn cancel(&self, user_id: i64, session_id: &str) -> bool {
        match self.tokens.lock().get(&key(user_id, session_id)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when the turn completes.
    pub fn remove(&self, user_id: i64, session_id: &str) {
        self.tokens.lock().remove(&key(user_id, session_id));
    }

    pub fn is_running(&self, user_id: i64, session_id: &str) -> bool {
        self.tokens.lock().contains_key(&key(user_id, session_id))
    }
}
