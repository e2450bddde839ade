//! In-process TTL'd key-value facade.
//!
//! Typed views over the key families the gateway uses: login codes,
//! refresh tokens, user preferences, session summaries, the tool-result
//! cache, and fixed-window rate counters. Values are UTF-8 strings or
//! JSON-encoded strings; never binary. Best-effort only — nothing here
//! participates in the turn transaction.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Thread-safe TTL map with the atomic increment semantics of a
/// fixed-window counter (`INCR` + first-write `EXPIRE`).
pub struct KvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    // ── Generic operations ─────────────────────────────────────────

    pub fn set(&self, key: &str, value: impl Into<String>, ttl: Option<Duration>) {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if !entry.expired(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Atomic fixed-window increment. The first write in a window sets
    /// the expiry; later increments keep it. Returns the counter value
    /// and the seconds remaining in the window.
    pub fn incr_window(&self, key: &str, window: Duration) -> (u64, u64) {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        let entry = entries.get_mut(key).filter(|e| !e.expired(now));
        match entry {
            Some(entry) => {
                let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
                entry.value = count.to_string();
                let remaining = entry
                    .expires_at
                    .map(|at| at.saturating_duration_since(now).as_secs())
                    .unwrap_or(0);
                (count, remaining)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".into(),
                        expires_at: Some(now + window),
                    },
                );
                (1, window.as_secs())
            }
        }
    }

    /// Drop expired entries. Called from a periodic background task.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| !e.expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    // ── Login codes ────────────────────────────────────────────────

    pub fn save_login_code(&self, email: &str, code: &str, ttl: Duration) {
        self.set(&format!("login_code:{email}"), code, Some(ttl));
    }

    pub fn get_login_code(&self, email: &str) -> Option<String> {
        self.get(&format!("login_code:{email}"))
    }

    /// Codes are single-use: deleted on successful login.
    pub fn delete_login_code(&self, email: &str) -> bool {
        self.delete(&format!("login_code:{email}"))
    }

    // ── Refresh tokens ─────────────────────────────────────────────

    pub fn save_refresh_token(&self, token: &str, user_id: i64, ttl: Duration) {
        self.set(
            &format!("refresh_token:{token}"),
            user_id.to_string(),
            Some(ttl),
        );
    }

    pub fn get_refresh_token(&self, token: &str) -> Option<i64> {
        self.get(&format!("refresh_token:{token}"))
            .and_then(|v| v.parse().ok())
    }

    pub fn delete_refresh_token(&self, token: &str) -> bool {
        self.delete(&format!("refresh_token:{token}"))
    }

    // ── User preferences ───────────────────────────────────────────

    pub fn save_user_pref(&self, user_id: i64, key: &str, value: &str, ttl: Duration) {
        self.set(&format!("user_pref:{user_id}:{key}"), value, Some(ttl));
    }

    pub fn get_user_pref(&self, user_id: i64, key: &str) -> Option<String> {
        self.get(&format!("user_pref:{user_id}:{key}"))
    }

    // ── Session summaries ──────────────────────────────────────────

    pub fn save_session_summary(&self, session_id: &str, summary: &str, ttl: Duration) {
        self.set(&format!("session_summary:{session_id}"), summary, Some(ttl));
    }

    pub fn get_session_summary(&self, session_id: &str) -> Option<String> {
        self.get(&format!("session_summary:{session_id}"))
    }

    /// Cleared on every successful turn finalize.
    pub fn delete_session_summary(&self, session_id: &str) -> bool {
        self.delete(&format!("session_summary:{session_id}"))
    }

    // ── Tool-result cache ──────────────────────────────────────────

    pub fn tool_cache_get(&self, tool_name: &str, fingerprint: &str) -> Option<String> {
        self.get(&format!("tool_cache:{tool_name}:{fingerprint}"))
    }

    pub fn tool_cache_put(&self, tool_name: &str, fingerprint: &str, value: String, ttl: Duration) {
        self.set(&format!("tool_cache:{tool_name}:{fingerprint}"), value, Some(ttl));
    }

    // ── Rate-limit counters ────────────────────────────────────────

    /// Increment the fixed-window counter for a scope key. Returns
    /// `(count, seconds_until_reset)`.
    pub fn rate_limit_incr(&self, scope_key: &str, window: Duration) -> (u64, u64) {
        self.incr_window(&format!("rate_limit:{scope_key}"), window)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
