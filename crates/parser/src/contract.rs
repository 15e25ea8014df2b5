//! Wire contract between the parser service and a remote inference model.
//!
//! The model speaks in concept *names*; relations are resolved back to
//! node ids by normalized canonical name on our side. Unknown enum values
//! fail deserialization, which the transformer backend treats as a
//! contract violation and routes to the heuristic fallback.

use serde::{Deserialize, Serialize};

use dg_domain::schemas::{GapType, RelationType, Turn};

fn d_general() -> String {
    "general".into()
}

fn d_conf_concept() -> f64 {
    0.8
}

fn d_conf_relation() -> f64 {
    0.75
}

fn d_priority() -> i32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConcept {
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "d_general")]
    pub domain: String,
    #[serde(default = "d_conf_concept")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRelation {
    pub source: String,
    pub target: String,
    pub relation_type: RelationType,
    #[serde(default = "d_conf_relation")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCoreference {
    pub mention: String,
    pub resolved_to: String,
    #[serde(default = "d_conf_relation")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelGap {
    pub gap_type: GapType,
    #[serde(default = "d_priority")]
    pub priority: i32,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParseRequest {
    pub tenant_id: String,
    pub session_id: String,
    pub turn: Turn,
    #[serde(default)]
    pub history: Vec<Turn>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelParseResponse {
    #[serde(default)]
    pub concepts: Vec<ModelConcept>,
    #[serde(default)]
    pub relations: Vec<ModelRelation>,
    #[serde(default)]
    pub coreferences: Vec<ModelCoreference>,
    #[serde(default)]
    pub knowledge_gaps: Vec<ModelGap>,
}
