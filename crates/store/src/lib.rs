//! Session store facade — typed views over the relational store
//! (sessions, messages, invocation telemetry, users, model catalog) and
//! the TTL'd key-value store (login codes, refresh tokens, preferences,
//! summaries, tool-result cache, rate counters).
//!
//! The [`recorder::TurnRecorder`] owns one transaction per agent turn:
//! rows written while the turn streams are flushed on that transaction
//! and become durable only at the single FINALIZE commit.

pub mod db;
pub mod kv;
pub mod models;
pub mod recorder;
pub mod store;

pub use db::Database;
pub use kv::KvStore;
pub use recorder::TurnRecorder;
pub use store::Store;

/// Error type for the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}

impl From<StoreError> for parley_domain::Error {
    fn from(e: StoreError) -> Self {
        parley_domain::Error::Persistence(e.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
