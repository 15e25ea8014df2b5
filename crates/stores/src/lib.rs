//! Persistence providers for the dialogue service: session/turn storage,
//! async-job storage, and the content cipher applied to turn text at rest.
//!
//! Each store is a trait object selected at startup from configuration.
//! The in-memory implementations satisfy the full contract and back tests
//! and development; the SQLite implementations are the durable option.

use std::sync::Arc;

use dg_domain::config::{StoreBackend, StoresConfig};
use dg_domain::Result;

pub mod cipher;
pub mod job;
pub mod session;

pub use cipher::ContentCipher;
pub use job::{JobStore, MemoryJobStore, SqliteJobStore};
pub use session::{MemorySessionStore, SessionStore, SqliteSessionStore, StoredTurnRecord};

/// Build the configured session store.
pub fn build_session_store(config: &StoresConfig) -> Result<Arc<dyn SessionStore>> {
    Ok(match config.session_backend {
        StoreBackend::Memory => Arc::new(MemorySessionStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteSessionStore::open(&config.db_path)?),
    })
}

/// Build the configured job store.
pub fn build_job_store(config: &StoresConfig) -> Result<Arc<dyn JobStore>> {
    Ok(match config.job_backend {
        StoreBackend::Memory => Arc::new(MemoryJobStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteJobStore::open(
            &config.db_path,
            config.job_ttl_seconds,
        )?),
    })
}
