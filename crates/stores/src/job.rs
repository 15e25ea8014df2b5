//! Async job storage.
//!
//! Jobs are keyed by `job_id` and move `queued → processing → {completed,
//! failed}`; the stores persist whatever the worker writes and never relax
//! a terminal state on their own. The SQLite store additionally expires
//! records after the configured TTL.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};

use dg_domain::schemas::AsyncTurnJob;
use dg_domain::{Error, Result};

pub trait JobStore: Send + Sync {
    fn create_job(&self, job: &AsyncTurnJob) -> Result<()>;
    fn upsert_job(&self, job: &AsyncTurnJob) -> Result<()>;
    fn get_job(&self, job_id: &str) -> Result<Option<AsyncTurnJob>>;
    fn is_ready(&self) -> (bool, String);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, AsyncTurnJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn create_job(&self, job: &AsyncTurnJob) -> Result<()> {
        self.jobs.write().insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    fn upsert_job(&self, job: &AsyncTurnJob) -> Result<()> {
        // Single map insert under the write lock: all-or-nothing.
        self.jobs.write().insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> Result<Option<AsyncTurnJob>> {
        Ok(self.jobs.read().get(job_id).cloned())
    }

    fn is_ready(&self) -> (bool, String) {
        (true, "memory job store ready".into())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SQLite store (TTL-expiring)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SqliteJobStore {
    conn: Mutex<Connection>,
    ttl_seconds: u64,
}

impl SqliteJobStore {
    pub fn open(db_path: &Path, ttl_seconds: u64) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).map_err(|e| Error::Store(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
            ttl_seconds,
        };
        store.init_schema()?;
        Ok(store)
    }

    #[cfg(test)]
    fn open_in_memory(ttl_seconds: u64) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
            ttl_seconds,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS pipeline_jobs (
                    job_id TEXT PRIMARY KEY,
                    record TEXT NOT NULL,
                    expires_at_ms INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_pipeline_jobs_expiry
                ON pipeline_jobs (expires_at_ms);
                "#,
            )
            .map_err(|e| Error::Store(e.to_string()))
    }

    /// Upsert the full record as one row write; partial states are never
    /// observable.
    fn write(&self, job: &AsyncTurnJob) -> Result<()> {
        let record = serde_json::to_string(job)?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let expires_at_ms = now_ms + (self.ttl_seconds as i64) * 1000;
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM pipeline_jobs WHERE expires_at_ms <= ?1",
            params![now_ms],
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        conn.execute(
            r#"
            INSERT INTO pipeline_jobs (job_id, record, expires_at_ms)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(job_id) DO UPDATE SET
                record = ?2,
                expires_at_ms = ?3
            "#,
            params![job.job_id, record, expires_at_ms],
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }
}

impl JobStore for SqliteJobStore {
    fn create_job(&self, job: &AsyncTurnJob) -> Result<()> {
        self.write(job)
    }

    fn upsert_job(&self, job: &AsyncTurnJob) -> Result<()> {
        self.write(job)
    }

    fn get_job(&self, job_id: &str) -> Result<Option<AsyncTurnJob>> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let conn = self.conn.lock();
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM pipeline_jobs WHERE job_id = ?1 AND expires_at_ms > ?2",
                params![job_id, now_ms],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Store(e.to_string()))?;
        match record {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        }
    }

    fn is_ready(&self) -> (bool, String) {
        let probe: std::result::Result<i64, _> =
            self.conn
                .lock()
                .query_row("SELECT 1", [], |row| row.get(0));
        match probe {
            Ok(_) => (true, "sqlite job store ready".into()),
            Err(e) => (false, format!("sqlite job store not ready: {e}")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use dg_domain::schemas::AsyncJobStatus;

    use super::*;

    fn job() -> AsyncTurnJob {
        AsyncTurnJob::queued("public", "sess_demo", "turn_demo")
    }

    fn check_store(store: &dyn JobStore) {
        let j = job();
        store.create_job(&j).unwrap();

        let fetched = store.get_job(&j.job_id).unwrap().unwrap();
        assert_eq!(fetched.status, AsyncJobStatus::Queued);
        assert!(fetched.result.is_none());
        assert!(fetched.error.is_none());

        let mut processing = j.clone();
        processing.status = AsyncJobStatus::Processing;
        store.upsert_job(&processing).unwrap();
        assert_eq!(
            store.get_job(&j.job_id).unwrap().unwrap().status,
            AsyncJobStatus::Processing
        );

        let mut failed = j.clone();
        failed.status = AsyncJobStatus::Failed;
        failed.error = Some("downstream timeout".into());
        store.upsert_job(&failed).unwrap();
        let terminal = store.get_job(&j.job_id).unwrap().unwrap();
        assert_eq!(terminal.status, AsyncJobStatus::Failed);
        assert_eq!(terminal.error.as_deref(), Some("downstream timeout"));

        assert!(store.get_job("job_missing").unwrap().is_none());
        assert!(store.is_ready().0);
    }

    #[test]
    fn memory_store_contract() {
        check_store(&MemoryJobStore::new());
    }

    #[test]
    fn sqlite_store_contract() {
        check_store(&SqliteJobStore::open_in_memory(3600).unwrap());
    }

    #[test]
    fn sqlite_ttl_expires_records() {
        let store = SqliteJobStore::open_in_memory(0).unwrap();
        let j = job();
        store.create_job(&j).unwrap();
        // TTL of zero: already expired on read.
        assert!(store.get_job(&j.job_id).unwrap().is_none());
    }

    #[test]
    fn sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let j = job();

        {
            let store = SqliteJobStore::open(&path, 3600).unwrap();
            store.create_job(&j).unwrap();
        }

        let store = SqliteJobStore::open(&path, 3600).unwrap();
        assert!(store.get_job(&j.job_id).unwrap().is_some());
    }
}
