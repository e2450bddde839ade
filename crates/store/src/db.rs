//! SQLite connection management and embedded migrations.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::StoreResult;

/// Handle to the relational store. Cloning shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database file and run migrations.
    pub async fn connect(path: &Path, max_connections: u32) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    crate::StoreError::Invalid(format!(
                        "cannot create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database for tests.
    ///
    /// Uses a uniquely-named shared-cache memory database so that every
    /// pool connection sees the same data (a plain `:memory:` database is
    /// private per connection), while separate tests stay isolated.
    pub async fn connect_in_memory() -> StoreResult<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT_DB: AtomicU64 = AtomicU64::new(0);
        let name = NEXT_DB.fetch_add(1, Ordering::Relaxed);

        let uri = format!("sqlite:file:parley_mem_{name}?mode=memory&cache=shared");
        let options = SqliteConnectOptions::from_str(&uri)
            .map_err(sqlx::Error::from)?
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true);

        // Keep one connection alive for the pool's lifetime — the shared
        // memory database is dropped when its last connection closes.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::debug!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
