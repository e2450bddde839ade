//! Per-(session, model) transport handle cache using [`moka`].
//!
//! Replaces shared per-process transport singletons with a bounded,
//! lock-free LRU cache. Entries are an optimization only — a miss just
//! builds a fresh handle over the shared HTTP pool.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use parley_domain::config::LlmConfig;

use crate::ndjson::NdjsonTransport;

/// LRU+TTL cache of transport handles, keyed `(session_id, model_id)`.
pub struct TransportCache {
    cache: Cache<(String, String), Arc<NdjsonTransport>>,
    client: reqwest::Client,
    config: LlmConfig,
}

impl TransportCache {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.transport_cache_capacity)
            .time_to_live(Duration::from_secs(config.transport_cache_ttl_secs))
            .build();
        Self {
            cache,
            client,
            config,
        }
    }

    /// Fetch (or build) the transport for a session/model pair.
    pub async fn get(
        &self,
        session_id: &str,
        model_id: &str,
        base_url: &str,
    ) -> Arc<NdjsonTransport> {
        let key = (session_id.to_string(), model_id.to_string());
        let (client, config) = (self.client.clone(), self.config.clone());
        let (base_url, model_id) = (base_url.to_string(), model_id.to_string());
        self.cache
            .get_with(key, async move {
                Arc::new(NdjsonTransport::new(base_url, model_id, client, &config))
            })
            .await
    }

    /// Number of live entries (approximate, for monitoring).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_pair_returns_same_handle() {
        let cache = TransportCache::new(reqwest::Client::new(), LlmConfig::default());
        let a = cache.get("s1", "qwen3:8b", "http://localhost:11434").await;
        let b = cache.get("s1", "qwen3:8b", "http://localhost:11434").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn different_sessions_get_distinct_handles() {
        let cache = TransportCache::new(reqwest::Client::new(), LlmConfig::default());
        let a = cache.get("s1", "qwen3:8b", "http://localhost:11434").await;
        let b = cache.get("s2", "qwen3:8b", "http://localhost:11434").await;
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
