//! AppState construction and background-task spawning.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use parley_domain::config::Config;
use parley_llm::{ndjson, TransportCache};
use parley_mcp::builtin::GeneralToolServer;
use parley_mcp::{ToolHub, ToolResultCache};
use parley_store::{Database, KvStore, Store};

use crate::auth::AuthTokens;
use crate::runtime::cancel::CancelMap;
use crate::runtime::context::ContextManager;
use crate::runtime::transport::CachedTransportFactory;
use crate::state::AppState;
use crate::ws::connection::ConnectionMap;

/// KV-backed implementation of the tool hub's result-cache hook.
struct KvToolCache {
    kv: Arc<KvStore>,
}

impl ToolResultCache for KvToolCache {
    fn get(&self, tool_name: &str, fingerprint: &str) -> Option<String> {
        self.kv.tool_cache_get(tool_name, fingerprint)
    }

    fn put(&self, tool_name: &str, fingerprint: &str, value: String, ttl: Duration) {
        self.kv.tool_cache_put(tool_name, fingerprint, value, ttl);
    }
}

/// Initialize every subsystem and return a fully-wired [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Relational store ─────────────────────────────────────────
    let db = Database::connect(&config.database.path, config.database.max_connections)
        .await
        .context("opening database")?;
    let store = Store::new(db);
    tracing::info!(path = %config.database.path.display(), "database ready");

    // ── KV store + periodic sweep ────────────────────────────────
    let kv = Arc::new(KvStore::new());
    {
        let kv = kv.clone();
        let interval = Duration::from_secs(config.kv.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = kv.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "kv sweep");
                }
            }
        });
    }
    tracing::info!("kv store ready");

    // ── Auth ─────────────────────────────────────────────────────
    let auth = Arc::new(AuthTokens::new(config.auth.clone(), kv.clone()));

    // ── LLM transports ───────────────────────────────────────────
    let http_client = ndjson::build_client(&config.llm).context("building HTTP client")?;
    let transports = Arc::new(CachedTransportFactory::new(TransportCache::new(
        http_client.clone(),
        config.llm.clone(),
    )));
    tracing::info!(
        connect_timeout_secs = config.llm.connect_timeout_secs,
        request_deadline_secs = config.llm.request_deadline_secs,
        "LLM transport ready"
    );

    // ── Tool hub + built-in server ───────────────────────────────
    let hub = Arc::new(ToolHub::new(
        Some(Arc::new(KvToolCache { kv: kv.clone() })),
        config.tools.cache_enabled,
        Duration::from_secs(config.tools.cache_ttl_secs),
    ));
    hub.register_server("general", Arc::new(GeneralToolServer::new(http_client)))
        .await
        .context("registering built-in tool server")?;
    tracing::info!(tools = hub.tool_definitions().len(), "tool hub ready");

    // ── Context manager ──────────────────────────────────────────
    let context = Arc::new(ContextManager::new(
        store.clone(),
        kv.clone(),
        config.context.clone(),
    ));

    // ── Streaming ────────────────────────────────────────────────
    let connections = Arc::new(ConnectionMap::new(Duration::from_secs(
        config.gateway.send_stall_secs,
    )));
    let cancel_map = Arc::new(CancelMap::new());

    Ok(AppState {
        config,
        store,
        kv,
        auth,
        transports,
        hub,
        context,
        connections,
        cancel_map,
    })
}
