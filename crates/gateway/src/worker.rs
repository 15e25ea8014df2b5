//! Async ingest worker.
//!
//! Exactly one cooperative consumer runs per dialogue process; horizontal
//! scale comes from running more processes against the same consumer group
//! on a durable bus. The loop drains `turn.ingested` in batches, runs the
//! pipeline per message with bounded exponential-backoff retries (all
//! in-process — redelivery is not used for retrying), then acks the whole
//! batch, dead-lettered messages included.
//!
//! A job always ends in a sticky terminal state: `completed` with a full
//! result plus one `turn.processed` event, or `failed` with the last error
//! plus one `turn.dead_letter` event carrying the original payload.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dg_bus::{topics, EventBus, EventEnvelope};
use dg_domain::config::{EventBusConfig, PipelineConfig};
use dg_domain::schemas::{AsyncJobStatus, Turn};
use dg_stores::JobStore;

use crate::pipeline::PipelineRunner;

const BATCH_SIZE: usize = 20;
const BLOCK_MS: u64 = 500;

/// Payload of a `turn.ingested` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPayload {
    pub job_id: String,
    pub tenant_id: String,
    pub session_id: String,
    pub turn: Turn,
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default)]
    pub api_key: Option<String>,
}

pub struct IngestWorker {
    bus: Arc<dyn EventBus>,
    jobs: Arc<dyn JobStore>,
    pipeline: Arc<dyn PipelineRunner>,
    group: String,
    consumer_name: String,
    max_attempts: u32,
    base_delay: Duration,
}

impl IngestWorker {
    pub fn new(
        bus: Arc<dyn EventBus>,
        jobs: Arc<dyn JobStore>,
        pipeline: Arc<dyn PipelineRunner>,
        group: String,
        consumer_name: String,
        max_attempts: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            bus,
            jobs,
            pipeline,
            group,
            consumer_name,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Build a worker from configuration, with a per-process consumer name.
    /// The backoff base is floored at 50 ms.
    pub fn from_config(
        bus: Arc<dyn EventBus>,
        jobs: Arc<dyn JobStore>,
        pipeline: Arc<dyn PipelineRunner>,
        bus_config: &EventBusConfig,
        pipeline_config: &PipelineConfig,
    ) -> Self {
        let consumer_name = format!(
            "dialogue-{}",
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        Self::new(
            bus,
            jobs,
            pipeline,
            bus_config.consumer_group.clone(),
            consumer_name,
            pipeline_config.retry_max_attempts,
            Duration::from_millis(pipeline_config.retry_base_delay_ms.max(50)),
        )
    }

    /// Spawn the consume loop. It exits within one poll interval of the
    /// token being cancelled.
    pub fn spawn(self: Arc<Self>, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                group = %self.group,
                consumer = %self.consumer_name,
                "ingest worker started"
            );
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    drained = self.bus.consume(
                        topics::TURN_INGESTED,
                        &self.group,
                        &self.consumer_name,
                        BATCH_SIZE,
                        BLOCK_MS,
                    ) => {
                        let batch = match drained {
                            Ok(batch) => batch,
                            Err(e) => {
                                tracing::warn!(error = %e, "consume failed");
                                tokio::time::sleep(Duration::from_millis(BLOCK_MS)).await;
                                continue;
                            }
                        };
                        if batch.is_empty() {
                            continue;
                        }
                        for envelope in &batch {
                            self.handle(envelope).await;
                        }
                        // Ack everything, including dead-lettered messages:
                        // retries are in-process, not by redelivery.
                        if let Err(e) = self
                            .bus
                            .ack(topics::TURN_INGESTED, &self.group, &batch)
                            .await
                        {
                            tracing::warn!(error = %e, "ack failed");
                        }
                    }
                }
            }
            tracing::info!(consumer = %self.consumer_name, "ingest worker stopped");
        })
    }

    async fn handle(&self, envelope: &EventEnvelope) {
        let payload: IngestPayload = match serde_json::from_value(envelope.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    message_id = %envelope.message_id,
                    error = %e,
                    "malformed ingest payload — dropping"
                );
                return;
            }
        };

        let mut job = match self.jobs.get_job(&payload.job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(job_id = %payload.job_id, "ingest event for unknown job");
                return;
            }
            Err(e) => {
                tracing::warn!(job_id = %payload.job_id, error = %e, "job lookup failed");
                return;
            }
        };

        job.status = AsyncJobStatus::Processing;
        if let Err(e) = self.jobs.upsert_job(&job) {
            tracing::warn!(job_id = %job.job_id, error = %e, "job update failed");
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self
                .pipeline
                .run(
                    &payload.tenant_id,
                    &payload.session_id,
                    payload.turn.clone(),
                    payload.history.clone(),
                    payload.api_key.as_deref(),
                )
                .await
            {
                Ok(result) => {
                    job.status = AsyncJobStatus::Completed;
                    job.result = Some(result);
                    job.error = None;
                    if let Err(e) = self.jobs.upsert_job(&job) {
                        tracing::warn!(job_id = %job.job_id, error = %e, "job update failed");
                    }
                    if let Err(e) = self
                        .bus
                        .publish(
                            topics::TURN_PROCESSED,
                            json!({
                                "job_id": job.job_id,
                                "tenant_id": job.tenant_id,
                                "session_id": job.session_id,
                                "turn_id": job.turn_id,
                                "status": AsyncJobStatus::Completed,
                            }),
                            Some(&job.turn_id),
                        )
                        .await
                    {
                        tracing::warn!(error = %e, "turn.processed publish failed");
                    }
                    return;
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        job_id = %job.job_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %last_error,
                        "async turn attempt failed"
                    );
                    if attempt < self.max_attempts {
                        let delay = self.base_delay * 2u32.pow(attempt - 1);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        job.status = AsyncJobStatus::Failed;
        job.error = Some(last_error.clone());
        if let Err(e) = self.jobs.upsert_job(&job) {
            tracing::warn!(job_id = %job.job_id, error = %e, "job update failed");
        }
        if let Err(e) = self
            .bus
            .publish(
                topics::TURN_DEAD_LETTER,
                json!({
                    "job_id": job.job_id,
                    "tenant_id": job.tenant_id,
                    "session_id": job.session_id,
                    "turn_id": job.turn_id,
                    "status": AsyncJobStatus::Failed,
                    "error": last_error,
                    "payload": envelope.payload,
                }),
                Some(&job.turn_id),
            )
            .await
        {
            tracing::warn!(error = %e, "turn.dead_letter publish failed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use dg_bus::InMemoryEventBus;
    use dg_domain::schemas::{
        AsyncTurnJob, DialogueTurnResponse, GraphUpsertResponse, ParseTurnResponse, Speaker,
        TurnCreate,
    };
    use dg_domain::{Error, Result};
    use dg_stores::MemoryJobStore;

    use super::*;

    /// Scripted pipeline: fails the first `fail_first` attempts, then
    /// succeeds. `u32::MAX` fails forever.
    struct ScriptedPipeline {
        fail_first: u32,
        attempts: AtomicU32,
    }

    impl ScriptedPipeline {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                attempts: AtomicU32::new(0),
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PipelineRunner for ScriptedPipeline {
        async fn run(
            &self,
            tenant_id: &str,
            session_id: &str,
            turn: Turn,
            _history: Vec<Turn>,
            _api_key: Option<&str>,
        ) -> Result<DialogueTurnResponse> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                return Err(Error::Http("transient".into()));
            }
            Ok(DialogueTurnResponse {
                parse: ParseTurnResponse {
                    tenant_id: tenant_id.to_owned(),
                    session_id: session_id.to_owned(),
                    turn_id: turn.turn_id.clone(),
                    concepts: Vec::new(),
                    relations: Vec::new(),
                    coreferences: Vec::new(),
                    knowledge_gaps: Vec::new(),
                },
                graph_update: GraphUpsertResponse {
                    tenant_id: tenant_id.to_owned(),
                    session_id: session_id.to_owned(),
                    added_nodes: 0,
                    merged_nodes: 0,
                    added_edges: 0,
                    merged_edges: 0,
                },
                suggested_questions: Vec::new(),
                turn,
            })
        }
    }

    struct Fixture {
        bus: Arc<InMemoryEventBus>,
        jobs: Arc<MemoryJobStore>,
        pipeline: Arc<ScriptedPipeline>,
        worker: Arc<IngestWorker>,
    }

    fn fixture(fail_first: u32, max_attempts: u32) -> Fixture {
        let bus = Arc::new(InMemoryEventBus::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let pipeline = Arc::new(ScriptedPipeline::new(fail_first));
        let worker = Arc::new(IngestWorker::new(
            bus.clone(),
            jobs.clone(),
            pipeline.clone(),
            "dialogue-service".into(),
            "dialogue-test".into(),
            max_attempts,
            Duration::from_millis(1),
        ));
        Fixture {
            bus,
            jobs,
            pipeline,
            worker,
        }
    }

    fn ingest_envelope(job: &AsyncTurnJob, turn: &Turn) -> EventEnvelope {
        EventEnvelope {
            message_id: "m1".into(),
            topic: topics::TURN_INGESTED.into(),
            key: Some(turn.turn_id.clone()),
            payload: serde_json::to_value(IngestPayload {
                job_id: job.job_id.clone(),
                tenant_id: job.tenant_id.clone(),
                session_id: job.session_id.clone(),
                turn: turn.clone(),
                history: Vec::new(),
                api_key: None,
            })
            .unwrap(),
        }
    }

    fn turn() -> Turn {
        Turn::new(
            "public".into(),
            "sess_demo".into(),
            TurnCreate {
                speaker: Speaker::User,
                content: "hello".into(),
                parent_turn_id: None,
            },
        )
    }

    #[tokio::test]
    async fn retry_then_success_completes_after_two_attempts() {
        let f = fixture(1, 3);
        let t = turn();
        let job = AsyncTurnJob::queued("public", "sess_demo", &t.turn_id);
        f.jobs.create_job(&job).unwrap();

        f.worker.handle(&ingest_envelope(&job, &t)).await;

        let stored = f.jobs.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, AsyncJobStatus::Completed);
        assert!(stored.result.is_some());
        assert!(stored.error.is_none());
        assert_eq!(f.pipeline.attempts(), 2);

        let processed = f
            .bus
            .consume(topics::TURN_PROCESSED, "t", "t", 10, 0)
            .await
            .unwrap();
        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].payload["job_id"], job.job_id);

        let dead = f
            .bus
            .consume(topics::TURN_DEAD_LETTER, "t", "t", 10, 0)
            .await
            .unwrap();
        assert!(dead.is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_exactly_once() {
        let f = fixture(u32::MAX, 2);
        let t = turn();
        let job = AsyncTurnJob::queued("public", "sess_demo", &t.turn_id);
        f.jobs.create_job(&job).unwrap();

        let envelope = ingest_envelope(&job, &t);
        f.worker.handle(&envelope).await;

        let stored = f.jobs.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, AsyncJobStatus::Failed);
        assert!(!stored.error.as_deref().unwrap_or("").is_empty());
        assert_eq!(f.pipeline.attempts(), 2);

        let dead = f
            .bus
            .consume(topics::TURN_DEAD_LETTER, "t", "t", 10, 0)
            .await
            .unwrap();
        assert_eq!(dead.len(), 1);
        // The dead letter carries the original payload verbatim.
        assert_eq!(dead[0].payload["payload"], envelope.payload);
        assert_eq!(dead[0].payload["error"], "HTTP: transient");

        let processed = f
            .bus
            .consume(topics::TURN_PROCESSED, "t", "t", 10, 0)
            .await
            .unwrap();
        assert!(processed.is_empty());
    }

    #[tokio::test]
    async fn zero_max_attempts_clamps_to_one() {
        let f = fixture(u32::MAX, 0);
        let t = turn();
        let job = AsyncTurnJob::queued("public", "sess_demo", &t.turn_id);
        f.jobs.create_job(&job).unwrap();

        f.worker.handle(&ingest_envelope(&job, &t)).await;

        assert_eq!(f.pipeline.attempts(), 1);
        assert_eq!(
            f.jobs.get_job(&job.job_id).unwrap().unwrap().status,
            AsyncJobStatus::Failed
        );
    }

    #[tokio::test]
    async fn unknown_job_is_skipped() {
        let f = fixture(0, 3);
        let t = turn();
        let ghost = AsyncTurnJob::queued("public", "sess_demo", &t.turn_id);
        // Never stored.
        f.worker.handle(&ingest_envelope(&ghost, &t)).await;
        assert_eq!(f.pipeline.attempts(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let f = fixture(0, 3);
        let envelope = EventEnvelope {
            message_id: "m1".into(),
            topic: topics::TURN_INGESTED.into(),
            key: None,
            payload: serde_json::json!({ "nope": true }),
        };
        f.worker.handle(&envelope).await;
        assert_eq!(f.pipeline.attempts(), 0);
    }

    #[tokio::test]
    async fn spawned_loop_processes_and_stops_on_cancel() {
        let f = fixture(0, 3);
        let t = turn();
        let job = AsyncTurnJob::queued("public", "sess_demo", &t.turn_id);
        f.jobs.create_job(&job).unwrap();

        let stop = CancellationToken::new();
        let handle = f.worker.clone().spawn(stop.clone());

        f.bus
            .publish(
                topics::TURN_INGESTED,
                ingest_envelope(&job, &t).payload,
                Some(&t.turn_id),
            )
            .await
            .unwrap();

        // Poll until the worker finishes the job.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let status = f.jobs.get_job(&job.job_id).unwrap().unwrap().status;
            if status.is_terminal() {
                assert_eq!(status, AsyncJobStatus::Completed);
                break;
            }
            assert!(std::time::Instant::now() < deadline, "worker never finished");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        stop.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop within the join timeout")
            .unwrap();
    }
}
