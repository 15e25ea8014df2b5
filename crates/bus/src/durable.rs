//! Durable event stream on SQLite with consumer-group semantics.
//!
//! One logical stream per topic, namespaced by the configured prefix.
//! Message ids are the monotone `seq` of the `messages` table. Each group
//! keeps a cursor (unread semantics); deliveries are tracked per
//! `(stream, group, seq)` and an unacked delivery becomes eligible for
//! redelivery once its visibility timeout elapses. Groups are created
//! lazily on first consume.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use dg_domain::{Error, Result};

use crate::{EventBus, EventEnvelope};

pub struct SqliteEventBus {
    conn: Mutex<Connection>,
    stream_prefix: String,
    visibility_timeout_ms: u64,
}

impl SqliteEventBus {
    pub fn open(
        db_path: &Path,
        stream_prefix: &str,
        visibility_timeout_ms: u64,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).map_err(|e| Error::Bus(e.to_string()))?;
        let bus = Self {
            conn: Mutex::new(conn),
            stream_prefix: stream_prefix.to_owned(),
            visibility_timeout_ms,
        };
        bus.init_schema()?;
        Ok(bus)
    }

    #[cfg(test)]
    fn open_in_memory(stream_prefix: &str, visibility_timeout_ms: u64) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Bus(e.to_string()))?;
        let bus = Self {
            conn: Mutex::new(conn),
            stream_prefix: stream_prefix.to_owned(),
            visibility_timeout_ms,
        };
        bus.init_schema()?;
        Ok(bus)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    stream TEXT NOT NULL,
                    key TEXT,
                    payload TEXT NOT NULL,
                    published_at_ms INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_stream ON messages(stream, seq);

                CREATE TABLE IF NOT EXISTS consumer_groups (
                    stream TEXT NOT NULL,
                    grp TEXT NOT NULL,
                    cursor INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (stream, grp)
                );

                CREATE TABLE IF NOT EXISTS deliveries (
                    stream TEXT NOT NULL,
                    grp TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    consumer TEXT NOT NULL,
                    delivered_at_ms INTEGER NOT NULL,
                    acked INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (stream, grp, seq)
                );

                CREATE INDEX IF NOT EXISTS idx_deliveries_pending
                ON deliveries(stream, grp, acked, delivered_at_ms);
                "#,
            )
            .map_err(|e| Error::Bus(e.to_string()))
    }

    fn stream_name(&self, topic: &str) -> String {
        format!("{}:{}", self.stream_prefix, topic)
    }

    /// One poll: redeliver timed-out messages first, then advance the
    /// group cursor over unread ones. Runs in a single transaction.
    fn poll(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<EventEnvelope>> {
        let stream = self.stream_name(topic);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Bus(e.to_string()))?;

        // Lazy group creation.
        tx.execute(
            "INSERT OR IGNORE INTO consumer_groups (stream, grp, cursor) VALUES (?1, ?2, 0)",
            params![stream, group],
        )
        .map_err(|e| Error::Bus(e.to_string()))?;

        let mut seqs: Vec<i64> = Vec::new();

        // Redeliveries: unacked past the visibility timeout.
        {
            let cutoff = now_ms - self.visibility_timeout_ms as i64;
            let mut stmt = tx
                .prepare(
                    "SELECT seq FROM deliveries
                     WHERE stream = ?1 AND grp = ?2 AND acked = 0 AND delivered_at_ms <= ?3
                     ORDER BY seq LIMIT ?4",
                )
                .map_err(|e| Error::Bus(e.to_string()))?;
            let redelivered = stmt
                .query_map(params![stream, group, cutoff, count as i64], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(|e| Error::Bus(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Bus(e.to_string()))?;
            if !redelivered.is_empty() {
                tracing::debug!(
                    topic,
                    group,
                    count = redelivered.len(),
                    "redelivering unacked messages"
                );
            }
            seqs.extend(redelivered);
        }
        for seq in &seqs {
            tx.execute(
                "UPDATE deliveries SET consumer = ?4, delivered_at_ms = ?5
                 WHERE stream = ?1 AND grp = ?2 AND seq = ?3",
                params![stream, group, seq, consumer, now_ms],
            )
            .map_err(|e| Error::Bus(e.to_string()))?;
        }

        // Fresh messages past the group cursor.
        if seqs.len() < count {
            let cursor: i64 = tx
                .query_row(
                    "SELECT cursor FROM consumer_groups WHERE stream = ?1 AND grp = ?2",
                    params![stream, group],
                    |row| row.get(0),
                )
                .map_err(|e| Error::Bus(e.to_string()))?;

            let remaining = (count - seqs.len()) as i64;
            let fresh: Vec<i64> = {
                let mut stmt = tx
                    .prepare(
                        "SELECT seq FROM messages
                         WHERE stream = ?1 AND seq > ?2
                         ORDER BY seq LIMIT ?3",
                    )
                    .map_err(|e| Error::Bus(e.to_string()))?;
                let result = stmt
                    .query_map(params![stream, cursor, remaining], |row| {
                        row.get::<_, i64>(0)
                    })
                    .map_err(|e| Error::Bus(e.to_string()))?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Error::Bus(e.to_string()))?;
                result
            };

            if let Some(last) = fresh.last() {
                tx.execute(
                    "UPDATE consumer_groups SET cursor = ?3 WHERE stream = ?1 AND grp = ?2",
                    params![stream, group, last],
                )
                .map_err(|e| Error::Bus(e.to_string()))?;
            }
            for seq in &fresh {
                tx.execute(
                    "INSERT OR REPLACE INTO deliveries
                     (stream, grp, seq, consumer, delivered_at_ms, acked)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                    params![stream, group, seq, consumer, now_ms],
                )
                .map_err(|e| Error::Bus(e.to_string()))?;
            }
            seqs.extend(fresh);
        }

        let mut out = Vec::with_capacity(seqs.len());
        for seq in &seqs {
            let (key, payload): (Option<String>, String) = tx
                .query_row(
                    "SELECT key, payload FROM messages WHERE seq = ?1",
                    params![seq],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|e| Error::Bus(e.to_string()))?;
            out.push(EventEnvelope {
                message_id: seq.to_string(),
                topic: topic.to_owned(),
                key,
                payload: serde_json::from_str(&payload)?,
            });
        }

        tx.commit().map_err(|e| Error::Bus(e.to_string()))?;
        Ok(out)
    }
}

#[async_trait]
impl EventBus for SqliteEventBus {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        key: Option<&str>,
    ) -> Result<String> {
        let stream = self.stream_name(topic);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let body = serde_json::to_string(&payload)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (stream, key, payload, published_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![stream, key, body, now_ms],
        )
        .map_err(|e| Error::Bus(e.to_string()))?;
        Ok(conn.last_insert_rowid().to_string())
    }

    async fn consume(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<EventEnvelope>> {
        let messages = self.poll(topic, group, consumer, count)?;
        if !messages.is_empty() || block_ms == 0 {
            return Ok(messages);
        }
        // Approximate a blocking read: wait out the block window, then
        // poll once more.
        tokio::time::sleep(Duration::from_millis(block_ms)).await;
        self.poll(topic, group, consumer, count)
    }

    async fn ack(&self, topic: &str, group: &str, messages: &[EventEnvelope]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let stream = self.stream_name(topic);
        let conn = self.conn.lock();
        for message in messages {
            let seq: i64 = message
                .message_id
                .parse()
                .map_err(|_| Error::Bus(format!("bad message id: {}", message.message_id)))?;
            conn.execute(
                "UPDATE deliveries SET acked = 1
                 WHERE stream = ?1 AND grp = ?2 AND seq = ?3",
                params![stream, group, seq],
            )
            .map_err(|e| Error::Bus(e.to_string()))?;
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
