use std::sync::Arc;

use parley_domain::config::Config;
use parley_mcp::ToolHub;
use parley_store::{KvStore, Store};

use crate::auth::AuthTokens;
use crate::runtime::cancel::CancelMap;
use crate::runtime::context::ContextManager;
use crate::runtime::transport::TransportFactory;
use crate::ws::connection::ConnectionMap;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, stores, auth
/// - **Agent runtime** — transports, tool hub, context manager
/// - **Streaming** — WebSocket connections, cancellation flags
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Store,
    pub kv: Arc<KvStore>,
    pub auth: Arc<AuthTokens>,

    // ── Agent runtime ─────────────────────────────────────────────
    pub transports: Arc<dyn TransportFactory>,
    pub hub: Arc<ToolHub>,
    pub context: Arc<ContextManager>,

    // ── Streaming ─────────────────────────────────────────────────
    pub connections: Arc<ConnectionMap>,
    pub cancel_map: Arc<CancelMap>,
}
