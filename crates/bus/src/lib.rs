//! Event bus abstraction: publish / consume / ack over interchangeable
//! backends.
//!
//! Two implementations share the [`EventBus`] contract:
//! - [`memory::InMemoryEventBus`] — per-topic FIFO queues, single-process,
//!   pop-on-consume (ack is a no-op). The test and dev default.
//! - [`durable::SqliteEventBus`] — a durable stream with consumer-group
//!   semantics: per-group cursors, delivery tracking, and redelivery of
//!   unacked messages after a visibility timeout.

use std::sync::Arc;

use async_trait::async_trait;
use dg_domain::config::{BusBackend, EventBusConfig};
use dg_domain::Result;

pub mod durable;
pub mod memory;

pub use durable::SqliteEventBus;
pub use memory::InMemoryEventBus;

/// Build the configured event bus backend.
pub fn build_event_bus(config: &EventBusConfig) -> Result<Arc<dyn EventBus>> {
    Ok(match config.backend {
        BusBackend::Memory => Arc::new(InMemoryEventBus::new()),
        BusBackend::Sqlite => Arc::new(SqliteEventBus::open(
            &config.db_path,
            &config.stream_prefix,
            config.visibility_timeout_ms,
        )?),
    })
}

/// Well-known topics.
pub mod topics {
    /// Input to the async ingest worker.
    pub const TURN_INGESTED: &str = "turn.ingested";
    /// Informational, emitted after sync or async pipeline success.
    pub const TURN_PROCESSED: &str = "turn.processed";
    /// Terminal event after the async pipeline exhausts its retries.
    pub const TURN_DEAD_LETTER: &str = "turn.dead_letter";
    /// Used only to probe bus liveness.
    pub const HEALTH_PING: &str = "health.ping";
}

/// A single message as seen by a consumer.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    /// Backend-assigned id, echoed back on ack.
    pub message_id: String,
    pub topic: String,
    pub key: Option<String>,
    pub payload: serde_json::Value,
}

/// Publish / consume / ack contract shared by all backends.
///
/// Ordering: a single consumer observes FIFO order on the in-memory
/// backend; the durable backend guarantees per-key ordering only to the
/// extent its storage does. Callers must not assume global order.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Append a message to `topic`; returns the backend-assigned id.
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        key: Option<&str>,
    ) -> Result<String>;

    /// Drain up to `count` messages for `(topic, group)`. An empty topic
    /// suspends the caller for up to `block_ms` before returning empty.
    async fn consume(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<EventEnvelope>>;

    /// Acknowledge the listed messages to `group`.
    async fn ack(&self, topic: &str, group: &str, messages: &[EventEnvelope]) -> Result<()>;
}
