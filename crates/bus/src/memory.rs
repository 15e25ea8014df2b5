//! In-process event bus: per-topic FIFO queues behind one mutex.
//!
//! Consumer groups and consumer names are ignored — messages are popped on
//! consume, so every message is seen by exactly one consumer and `ack` is a
//! no-op. Intended for single-process deployments and tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use dg_domain::Result;

use crate::{EventBus, EventEnvelope};

#[derive(Default)]
pub struct InMemoryEventBus {
    topics: Mutex<HashMap<String, VecDeque<EventEnvelope>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        key: Option<&str>,
    ) -> Result<String> {
        let message_id = Uuid::new_v4().simple().to_string();
        let envelope = EventEnvelope {
            message_id: message_id.clone(),
            topic: topic.to_owned(),
            key: key.map(str::to_owned),
            payload,
        };
        self.topics
            .lock()
            .entry(topic.to_owned())
            .or_default()
            .push_back(envelope);
        Ok(message_id)
    }

    async fn consume(
        &self,
        topic: &str,
        _group: &str,
        _consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<EventEnvelope>> {
        let drained = {
            let mut topics = self.topics.lock();
            let queue = topics.entry(topic.to_owned()).or_default();
            let take = count.min(queue.len());
            queue.drain(..take).collect::<Vec<_>>()
        };

        if drained.is_empty() && block_ms > 0 {
            tokio::time::sleep(Duration::from_millis(block_ms)).await;
        }
        Ok(drained)
    }

    async fn ack(&self, _topic: &str, _group: &str, _messages: &[EventEnvelope]) -> Result<()> {
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
