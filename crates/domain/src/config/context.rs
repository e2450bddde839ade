use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context management
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls history summarization: when the session's context-token count
/// crosses `summarize_threshold` of the model's window, everything older
/// than the most recent `keep_recent_messages` is collapsed into one
/// system summary message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Fraction of the model's max context at which summarization runs.
    #[serde(default = "d_threshold")]
    pub summarize_threshold: f64,
    /// Messages kept verbatim when summarizing.
    #[serde(default = "d_5")]
    pub keep_recent_messages: usize,
    /// Word budget requested from the summarizer.
    #[serde(default = "d_200")]
    pub summary_max_words: usize,
    /// Character cap for generated session titles.
    #[serde(default = "d_30")]
    pub title_max_chars: usize,
    /// TTL of the KV mirror of the latest summary (2 hours).
    #[serde(default = "d_7200")]
    pub summary_cache_ttl_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            summarize_threshold: 0.9,
            keep_recent_messages: 5,
            summary_max_words: 200,
            title_max_chars: 30,
            summary_cache_ttl_secs: 7200,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_threshold() -> f64 {
    0.9
}
fn d_5() -> usize {
    5
}
fn d_200() -> usize {
    200
}
fn d_30() -> usize {
    30
}
fn d_7200() -> u64 {
    7200
}
