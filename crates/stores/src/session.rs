//! Session and turn storage.
//!
//! Sessions are keyed by `(tenant_id, session_id)` and immutable once
//! created. Turns are appended with their content already encrypted by the
//! caller; re-appending the same turn id overwrites (idempotent). Listing
//! returns turns sorted by `(created_at, turn_id)`.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};

use dg_domain::schemas::{Session, Speaker, Turn};
use dg_domain::{Error, Result};

/// A turn as stored: content is ciphertext, never plaintext.
#[derive(Debug, Clone)]
pub struct StoredTurnRecord {
    pub turn_id: String,
    pub tenant_id: String,
    pub session_id: String,
    pub speaker: Speaker,
    pub parent_turn_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub content_ciphertext: String,
}

pub trait SessionStore: Send + Sync {
    fn create_session(&self, session: &Session) -> Result<()>;
    fn get_session(&self, tenant_id: &str, session_id: &str) -> Result<Option<Session>>;
    fn append_turn(&self, turn: &Turn, content_ciphertext: &str) -> Result<()>;
    fn list_turns(&self, tenant_id: &str, session_id: &str) -> Result<Vec<StoredTurnRecord>>;
    fn is_ready(&self) -> (bool, String);
}

fn scope_key(tenant_id: &str, session_id: &str) -> String {
    format!("{tenant_id}:{session_id}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    turns: RwLock<HashMap<String, Vec<StoredTurnRecord>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn create_session(&self, session: &Session) -> Result<()> {
        self.sessions.write().insert(
            scope_key(&session.tenant_id, &session.session_id),
            session.clone(),
        );
        Ok(())
    }

    fn get_session(&self, tenant_id: &str, session_id: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .get(&scope_key(tenant_id, session_id))
            .cloned())
    }

    fn append_turn(&self, turn: &Turn, content_ciphertext: &str) -> Result<()> {
        let record = StoredTurnRecord {
            turn_id: turn.turn_id.clone(),
            tenant_id: turn.tenant_id.clone(),
            session_id: turn.session_id.clone(),
            speaker: turn.speaker,
            parent_turn_id: turn.parent_turn_id.clone(),
            created_at: turn.created_at,
            content_ciphertext: content_ciphertext.to_owned(),
        };
        // The write lock serializes appends per scope.
        let mut turns = self.turns.write();
        let rows = turns
            .entry(scope_key(&turn.tenant_id, &turn.session_id))
            .or_default();
        match rows.iter_mut().find(|r| r.turn_id == turn.turn_id) {
            Some(existing) => *existing = record,
            None => rows.push(record),
        }
        Ok(())
    }

    fn list_turns(&self, tenant_id: &str, session_id: &str) -> Result<Vec<StoredTurnRecord>> {
        let mut rows = self
            .turns
            .read()
            .get(&scope_key(tenant_id, session_id))
            .cloned()
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            (a.created_at, a.turn_id.as_str()).cmp(&(b.created_at, b.turn_id.as_str()))
        });
        Ok(rows)
    }

    fn is_ready(&self) -> (bool, String) {
        (true, "memory session store ready".into())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SQLite store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).map_err(|e| Error::Store(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS dialogue_sessions (
                    tenant_id TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    metadata TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (tenant_id, session_id)
                );

                CREATE TABLE IF NOT EXISTS dialogue_turns (
                    tenant_id TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    turn_id TEXT NOT NULL,
                    speaker TEXT NOT NULL,
                    parent_turn_id TEXT,
                    created_at TEXT NOT NULL,
                    content_ciphertext TEXT NOT NULL,
                    PRIMARY KEY (tenant_id, session_id, turn_id)
                );

                CREATE INDEX IF NOT EXISTS idx_dialogue_turns_lookup
                ON dialogue_turns (tenant_id, session_id, created_at, turn_id);
                "#,
            )
            .map_err(|e| Error::Store(e.to_string()))
    }
}

fn speaker_to_str(speaker: Speaker) -> &'static str {
    match speaker {
        Speaker::User => "user",
        Speaker::Assistant => "assistant",
        Speaker::System => "system",
    }
}

fn speaker_from_str(raw: &str) -> Speaker {
    match raw {
        "assistant" => Speaker::Assistant,
        "system" => Speaker::System,
        _ => Speaker::User,
    }
}

fn ts_to_str(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn ts_from_str(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("bad timestamp {raw:?}: {e}")))
}

impl SessionStore for SqliteSessionStore {
    fn create_session(&self, session: &Session) -> Result<()> {
        let metadata = serde_json::to_string(&session.metadata)?;
        self.conn
            .lock()
            .execute(
                r#"
                INSERT INTO dialogue_sessions (tenant_id, session_id, user_id, metadata, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(tenant_id, session_id) DO UPDATE SET
                    user_id = ?3,
                    metadata = ?4,
                    created_at = ?5
                "#,
                params![
                    session.tenant_id,
                    session.session_id,
                    session.user_id,
                    metadata,
                    ts_to_str(session.created_at),
                ],
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    fn get_session(&self, tenant_id: &str, session_id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                r#"
                SELECT tenant_id, session_id, user_id, metadata, created_at
                FROM dialogue_sessions
                WHERE tenant_id = ?1 AND session_id = ?2
                "#,
                params![tenant_id, session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| Error::Store(e.to_string()))?;

        match row {
            None => Ok(None),
            Some((tenant_id, session_id, user_id, metadata, created_at)) => Ok(Some(Session {
                tenant_id,
                session_id,
                user_id,
                metadata: serde_json::from_str(&metadata)?,
                created_at: ts_from_str(&created_at)?,
            })),
        }
    }

    fn append_turn(&self, turn: &Turn, content_ciphertext: &str) -> Result<()> {
        self.conn
            .lock()
            .execute(
                r#"
                INSERT INTO dialogue_turns
                    (tenant_id, session_id, turn_id, speaker, parent_turn_id, created_at, content_ciphertext)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(tenant_id, session_id, turn_id) DO UPDATE SET
                    speaker = ?4,
                    parent_turn_id = ?5,
                    created_at = ?6,
                    content_ciphertext = ?7
                "#,
                params![
                    turn.tenant_id,
                    turn.session_id,
                    turn.turn_id,
                    speaker_to_str(turn.speaker),
                    turn.parent_turn_id,
                    ts_to_str(turn.created_at),
                    content_ciphertext,
                ],
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    fn list_turns(&self, tenant_id: &str, session_id: &str) -> Result<Vec<StoredTurnRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT turn_id, tenant_id, session_id, speaker, parent_turn_id, created_at, content_ciphertext
                FROM dialogue_turns
                WHERE tenant_id = ?1 AND session_id = ?2
                ORDER BY created_at ASC, turn_id ASC
                "#,
            )
            .map_err(|e| Error::Store(e.to_string()))?;

        let rows = stmt
            .query_map(params![tenant_id, session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(|e| Error::Store(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Store(e.to_string()))?;

        rows.into_iter()
            .map(
                |(turn_id, tenant_id, session_id, speaker, parent_turn_id, created_at, ct)| {
                    Ok(StoredTurnRecord {
                        turn_id,
                        tenant_id,
                        session_id,
                        speaker: speaker_from_str(&speaker),
                        parent_turn_id,
                        created_at: ts_from_str(&created_at)?,
                        content_ciphertext: ct,
                    })
                },
            )
            .collect()
    }

    fn is_ready(&self) -> (bool, String) {
        let probe: std::result::Result<i64, _> =
            self.conn
                .lock()
                .query_row("SELECT 1", [], |row| row.get(0));
        match probe {
            Ok(_) => (true, "sqlite session store ready".into()),
            Err(e) => (false, format!("sqlite session store not ready: {e}")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use dg_domain::schemas::TurnCreate;

    use super::*;

    fn turn(tenant: &str, session: &str, content: &str) -> Turn {
        Turn::new(
            tenant.into(),
            session.into(),
            TurnCreate {
                speaker: Speaker::User,
                content: content.into(),
                parent_turn_id: None,
            },
        )
    }

    fn check_store(store: &dyn SessionStore) {
        let session = Session::new("public".into(), "u1".into(), Default::default());
        store.create_session(&session).unwrap();

        let fetched = store
            .get_session("public", &session.session_id)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.user_id, "u1");

        // Cross-tenant read misses.
        assert!(store
            .get_session("other", &session.session_id)
            .unwrap()
            .is_none());

        let t1 = turn("public", &session.session_id, "first");
        let t2 = turn("public", &session.session_id, "second");
        store.append_turn(&t1, "ct-1").unwrap();
        store.append_turn(&t2, "ct-2").unwrap();

        let rows = store.list_turns("public", &session.session_id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].turn_id, t1.turn_id);
        assert_eq!(rows[0].content_ciphertext, "ct-1");

        // Re-appending the same turn id overwrites in place.
        store.append_turn(&t1, "ct-1b").unwrap();
        let rows = store.list_turns("public", &session.session_id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].content_ciphertext, "ct-1b");

        // Prefix stability: earlier turns keep their index.
        let t3 = turn("public", &session.session_id, "third");
        store.append_turn(&t3, "ct-3").unwrap();
        let rows = store.list_turns("public", &session.session_id).unwrap();
        assert_eq!(rows[0].turn_id, t1.turn_id);
        assert_eq!(rows[1].turn_id, t2.turn_id);
        assert_eq!(rows[2].turn_id, t3.turn_id);

        assert!(store.is_ready().0);
    }

    #[test]
    fn memory_store_contract() {
        check_store(&MemorySessionStore::new());
    }

    #[test]
    fn sqlite_store_contract() {
        check_store(&SqliteSessionStore::open_in_memory().unwrap());
    }

    #[test]
    fn tenants_are_isolated() {
        let store = MemorySessionStore::new();
        let s1 = Session::new("t1".into(), "u".into(), Default::default());
        store.create_session(&s1).unwrap();

        // Same session id under another tenant is a separate scope.
        let mut s2 = Session::new("t2".into(), "u".into(), Default::default());
        s2.session_id = s1.session_id.clone();
        store.create_session(&s2).unwrap();

        let t = turn("t1", &s1.session_id, "only in t1");
        store.append_turn(&t, "ct").unwrap();

        assert_eq!(store.list_turns("t1", &s1.session_id).unwrap().len(), 1);
        assert!(store.list_turns("t2", &s1.session_id).unwrap().is_empty());
    }

    #[test]
    fn sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        let session = Session::new("public".into(), "u1".into(), Default::default());
        {
            let store = SqliteSessionStore::open(&path).unwrap();
            store.create_session(&session).unwrap();
            let t = turn("public", &session.session_id, "hello");
            store.append_turn(&t, "ct").unwrap();
        }

        let store = SqliteSessionStore::open(&path).unwrap();
        assert!(store
            .get_session("public", &session.session_id)
            .unwrap()
            .is_some());
        assert_eq!(
            store.list_turns("public", &session.session_id).unwrap().len(),
            1
        );
    }
}
