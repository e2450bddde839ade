mod agent;
mod context;
mod llm;
mod server;
mod storage;

pub use agent::*;
pub use context::*;
pub use llm::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Sanity-check the loaded configuration. Errors should abort startup;
    /// warnings are logged and tolerated.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be non-zero".into(),
            });
        }

        if self.agent.max_iterations == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "agent.max_iterations".into(),
                message: "must allow at least one iteration".into(),
            });
        }

        if self.context.summarize_threshold <= 0.0 || self.context.summarize_threshold > 1.0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "context.summarize_threshold".into(),
                message: "must be in (0, 1]".into(),
            });
        }

        if self.rate_limit.enabled && self.rate_limit.limit == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "rate_limit.limit".into(),
                message: "limit must be non-zero when rate limiting is enabled".into(),
            });
        }

        if self.llm.connect_timeout_secs >= self.llm.request_deadline_secs {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "llm.connect_timeout_secs".into(),
                message: "connect timeout is not below the overall deadline".into(),
            });
        }

        if self.server.cors.allowed_origins.iter().any(|o| o == "*") {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard origin with credentials is rejected by browsers".into(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "default config has errors: {errors:?}");
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "server.port"));
    }

    #[test]
    fn wildcard_cors_warns() {
        let mut config = Config::default();
        config.server.cors.allowed_origins = vec!["*".into()];
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, ServerConfig::default().port);
        assert_eq!(config.agent.max_iterations, 50);
    }
}
