use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// TCP connect timeout for the streaming endpoint.
    #[serde(default = "d_5")]
    pub connect_timeout_secs: u64,
    /// Overall wall-clock deadline for one streaming call.
    #[serde(default = "d_300")]
    pub request_deadline_secs: u64,
    /// Pooled-client limits shared across sessions.
    #[serde(default = "d_100")]
    pub pool_max_connections: usize,
    #[serde(default = "d_20")]
    pub pool_max_keepalive: usize,
    /// Per-model transport handle cache (LRU).
    #[serde(default = "d_1024")]
    pub transport_cache_capacity: u64,
    #[serde(default = "d_3600")]
    pub transport_cache_ttl_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_deadline_secs: 300,
            pool_max_connections: 100,
            pool_max_keepalive: 20,
            transport_cache_capacity: 1024,
            transport_cache_ttl_secs: 3600,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools / MCP hub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default TTL for cached tool results (tools may override).
    #[serde(default = "d_3600")]
    pub cache_ttl_secs: u64,
    /// Enable the tool-result cache for tools that declare themselves
    /// cacheable.
    #[serde(default = "d_true")]
    pub cache_enabled: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            cache_enabled: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_5() -> u64 {
    5
}
fn d_300() -> u64 {
    300
}
fn d_100() -> usize {
    100
}
fn d_20() -> usize {
    20
}
fn d_1024() -> u64 {
    1024
}
fn d_3600() -> u64 {
    3600
}
fn d_true() -> bool {
    true
}
