//! Wire schemas shared by all four services.
//!
//! Every identifier is an opaque `<prefix>_<12-hex>` string minted by
//! [`new_id`]; timestamps are UTC with millisecond resolution.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mint an opaque id like `sess_a1b2c3d4e5f6`.
pub fn new_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..12])
}

/// Current UTC time truncated to millisecond resolution.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Causal,
    Chronology,
    Contrast,
    Dependency,
    Definition,
    Example,
}

impl RelationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Causal => "causal",
            Self::Chronology => "chronology",
            Self::Contrast => "contrast",
            Self::Dependency => "dependency",
            Self::Definition => "definition",
            Self::Example => "example",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapType {
    MissingPrerequisite,
    WeakEvidence,
    AmbiguousReference,
    UnresolvedBranch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncJobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl AsyncJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions & turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Request body for `POST /v1/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreate {
    pub user_id: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// If present, must match the tenant header.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// A dialogue session. Immutable once created; unique by
/// `(tenant_id, session_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub tenant_id: String,
    pub user_id: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        tenant_id: String,
        user_id: String,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            session_id: new_id("sess"),
            tenant_id,
            user_id,
            metadata,
            created_at: utc_now(),
        }
    }
}

/// Request body for appending a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnCreate {
    pub speaker: Speaker,
    pub content: String,
    #[serde(default)]
    pub parent_turn_id: Option<String>,
}

/// A single utterance within a session. Appended, never mutated; ordered
/// by `(created_at, turn_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    pub tenant_id: String,
    pub session_id: String,
    pub speaker: Speaker,
    pub content: String,
    #[serde(default)]
    pub parent_turn_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(tenant_id: String, session_id: String, create: TurnCreate) -> Self {
        Self {
            turn_id: new_id("turn"),
            tenant_id,
            session_id,
            speaker: create.speaker,
            content: create.content,
            parent_turn_id: create.parent_turn_id,
            created_at: utc_now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Graph entities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_general() -> String {
    "general".into()
}

fn d_public() -> String {
    "public".into()
}

fn d_half() -> f64 {
    0.5
}

/// A named entity extracted from a turn, scoped to one session.
/// Deduplicated by `lower(trim(canonical_name))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub node_id: String,
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "d_general")]
    pub domain: String,
    #[serde(default = "d_half")]
    pub confidence: f64,
    #[serde(default)]
    pub evidence_turn_ids: Vec<String>,
}

impl Concept {
    pub fn new(canonical_name: impl Into<String>) -> Self {
        Self {
            node_id: new_id("node"),
            canonical_name: canonical_name.into(),
            aliases: Vec::new(),
            domain: d_general(),
            confidence: d_half(),
            evidence_turn_ids: Vec::new(),
        }
    }
}

/// A typed directed edge between two concepts in the same session scope.
/// Deduplicated by `(source, target, relation_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub edge_id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub relation_type: RelationType,
    #[serde(default = "d_half")]
    pub confidence: f64,
    #[serde(default)]
    pub evidence_turn_ids: Vec<String>,
}

impl Relation {
    pub fn new(
        source_node_id: impl Into<String>,
        target_node_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            edge_id: new_id("edge"),
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            relation_type,
            confidence: d_half(),
            evidence_turn_ids: Vec::new(),
        }
    }
}

/// A pronoun mention resolved to an antecedent concept name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coreference {
    pub mention: String,
    pub resolved_to: String,
    #[serde(default = "d_half")]
    pub confidence: f64,
}

fn d_priority() -> i32 {
    2
}

/// A machine-detected deficiency in the dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGap {
    pub gap_id: String,
    pub session_id: String,
    pub gap_type: GapType,
    #[serde(default = "d_priority")]
    pub priority: i32,
    pub description: String,
}

impl KnowledgeGap {
    pub fn new(
        session_id: impl Into<String>,
        gap_type: GapType,
        priority: i32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            gap_id: new_id("gap"),
            session_id: session_id.into(),
            gap_type,
            priority,
            description: description.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parser contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseTurnRequest {
    #[serde(default = "d_public")]
    pub tenant_id: String,
    pub session_id: String,
    pub turn: Turn,
    #[serde(default)]
    pub history: Vec<Turn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseTurnResponse {
    pub tenant_id: String,
    pub session_id: String,
    pub turn_id: String,
    #[serde(default)]
    pub concepts: Vec<Concept>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub coreferences: Vec<Coreference>,
    #[serde(default)]
    pub knowledge_gaps: Vec<KnowledgeGap>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Graph contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphUpsertRequest {
    #[serde(default = "d_public")]
    pub tenant_id: String,
    pub session_id: String,
    #[serde(default)]
    pub concepts: Vec<Concept>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphUpsertResponse {
    pub tenant_id: String,
    pub session_id: String,
    pub added_nodes: usize,
    pub merged_nodes: usize,
    pub added_edges: usize,
    pub merged_edges: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub tenant_id: String,
    pub session_id: String,
    pub concepts: Vec<Concept>,
    pub relations: Vec<Relation>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Suggestion contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionRequest {
    #[serde(default = "d_public")]
    pub tenant_id: String,
    pub session_id: String,
    #[serde(default)]
    pub knowledge_gaps: Vec<KnowledgeGap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub question: String,
    pub reason: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub tenant_id: String,
    pub session_id: String,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dialogue responses & async jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregate response of the synchronous turn pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueTurnResponse {
    pub turn: Turn,
    pub parse: ParseTurnResponse,
    pub graph_update: GraphUpsertResponse,
    #[serde(default)]
    pub suggested_questions: Vec<Suggestion>,
}

/// `202`-style acknowledgement of an async submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncTurnAccepted {
    pub job_id: String,
    pub tenant_id: String,
    pub session_id: String,
    pub turn_id: String,
    pub status: AsyncJobStatus,
}

/// Persisted job record. Status moves `queued → processing → {completed,
/// failed}` only; terminal states are sticky.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncTurnJob {
    pub job_id: String,
    pub tenant_id: String,
    pub session_id: String,
    pub turn_id: String,
    pub status: AsyncJobStatus,
    #[serde(default)]
    pub result: Option<DialogueTurnResponse>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AsyncTurnJob {
    pub fn queued(
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
        turn_id: impl Into<String>,
    ) -> Self {
        Self {
            job_id: new_id("job"),
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            turn_id: turn_id.into(),
            status: AsyncJobStatus::Queued,
            result: None,
            error: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_shape() {
        let id = new_id("sess");
        assert!(id.starts_with("sess_"));
        let hex = id.strip_prefix("sess_").unwrap();
        assert_eq!(hex.len(), 12);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_are_unique() {
        let a = new_id("turn");
        let b = new_id("turn");
        assert_ne!(a, b);
    }

    #[test]
    fn utc_now_millisecond_resolution() {
        let ts = utc_now();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(serde_json::to_string(&Speaker::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&RelationType::Causal).unwrap(),
            "\"causal\""
        );
        assert_eq!(
            serde_json::to_string(&GapType::MissingPrerequisite).unwrap(),
            "\"missing_prerequisite\""
        );
        assert_eq!(
            serde_json::to_string(&AsyncJobStatus::Queued).unwrap(),
            "\"queued\""
        );
    }

    #[test]
    fn job_status_terminality() {
        assert!(!AsyncJobStatus::Queued.is_terminal());
        assert!(!AsyncJobStatus::Processing.is_terminal());
        assert!(AsyncJobStatus::Completed.is_terminal());
        assert!(AsyncJobStatus::Failed.is_terminal());
    }

    #[test]
    fn concept_defaults_on_deserialize() {
        let c: Concept = serde_json::from_str(
            r#"{"node_id":"node_000000000001","canonical_name":"Transformer"}"#,
        )
        .unwrap();
        assert_eq!(c.domain, "general");
        assert!((c.confidence - 0.5).abs() < f64::EPSILON);
        assert!(c.aliases.is_empty());
        assert!(c.evidence_turn_ids.is_empty());
    }

    #[test]
    fn parse_response_roundtrip() {
        let turn = Turn::new(
            "public".into(),
            "sess_demo".into(),
            TurnCreate {
                speaker: Speaker::User,
                content: "hello".into(),
                parent_turn_id: None,
            },
        );
        let resp = ParseTurnResponse {
            tenant_id: "public".into(),
            session_id: "sess_demo".into(),
            turn_id: turn.turn_id.clone(),
            concepts: vec![Concept::new("Transformer Models")],
            relations: Vec::new(),
            coreferences: Vec::new(),
            knowledge_gaps: Vec::new(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: ParseTurnResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.concepts.len(), 1);
        assert_eq!(back.concepts[0].canonical_name, "Transformer Models");
    }
}
