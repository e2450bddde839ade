use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (created if missing).
    #[serde(default = "d_db_path")]
    pub path: PathBuf,
    #[serde(default = "d_10")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: d_db_path(),
            max_connections: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// KV store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    /// Interval of the background sweep that drops expired entries.
    #[serde(default = "d_60")]
    pub sweep_interval_secs: u64,
    /// TTL for cached user preferences (24 hours).
    #[serde(default = "d_86400")]
    pub user_pref_ttl_secs: u64,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            user_pref_ttl_secs: 86_400,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_db_path() -> PathBuf {
    PathBuf::from("./data/parley.db")
}
fn d_10() -> u32 {
    10
}
fn d_60() -> u64 {
    60
}
fn d_86400() -> u64 {
    86_400
}
