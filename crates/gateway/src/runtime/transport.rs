//! Transport resolution for the agent loop.
//!
//! A factory seam so the turn loop never constructs HTTP clients itself:
//! production resolves through the LRU handle cache; tests substitute a
//! scripted transport.

use std::sync::Arc;

use parley_llm::{ChatTransport, TransportCache};
use parley_store::models::AiModelRow;

#[async_trait::async_trait]
pub trait TransportFactory: Send + Sync {
    /// Resolve the chat transport for one session/model pair.
    async fn for_model(&self, session_id: &str, model: &AiModelRow) -> Arc<dyn ChatTransport>;
}

/// Production factory backed by the per-(session, model) handle cache.
pub struct CachedTransportFactory {
    cache: TransportCache,
}

impl CachedTransportFactory {
    pub fn new(cache: TransportCache) -> Self {
        Self { cache }
    }
}

#[async_trait::async_trait]
impl TransportFactory for CachedTransportFactory {
    async fn for_model(&self, session_id: &str, model: &AiModelRow) -> Arc<dyn ChatTransport> {
        self.cache
            .get(session_id, &model.model_id, &model.base_url)
            .await
    }
}
