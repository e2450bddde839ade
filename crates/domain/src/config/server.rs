use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_8000")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Maximum concurrent in-flight HTTP requests.
    #[serde(default = "d_256")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "127.0.0.1".into(),
            max_concurrent_requests: 256,
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS (credentials are always allowed, so a
    /// literal `"*"` will not work in browsers). Defaults to localhost.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the HMAC signing secret for access
    /// tokens. Unset = a random per-process secret (tokens do not survive
    /// restarts).
    #[serde(default = "d_secret_env")]
    pub secret_env: String,
    /// Access token lifetime.
    #[serde(default = "d_1800")]
    pub access_ttl_secs: u64,
    /// Refresh token lifetime (7 days).
    #[serde(default = "d_refresh_ttl")]
    pub refresh_ttl_secs: u64,
    /// Login code lifetime (5 minutes).
    #[serde(default = "d_300")]
    pub login_code_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_env: d_secret_env(),
            access_ttl_secs: 1800,
            refresh_ttl_secs: d_refresh_ttl(),
            login_code_ttl_secs: 300,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limiting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed-window request limiter, keyed per authenticated user with a
/// per-IP fallback. Auth, health, and WebSocket upgrade routes are exempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Requests allowed per window.
    #[serde(default = "d_60u")]
    pub limit: u64,
    /// Window length in seconds.
    #[serde(default = "d_60u")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 60,
            window_secs: 60,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_8000() -> u16 {
    8000
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_256() -> usize {
    256
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".into(), "http://127.0.0.1:5173".into()]
}
fn d_secret_env() -> String {
    "PARLEY_AUTH_SECRET".into()
}
fn d_1800() -> u64 {
    1800
}
fn d_refresh_ttl() -> u64 {
    7 * 24 * 60 * 60
}
fn d_300() -> u64 {
    300
}
fn d_true() -> bool {
    true
}
fn d_60u() -> u64 {
    60
}
