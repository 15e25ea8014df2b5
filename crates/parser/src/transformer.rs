//! Remote transformer parser backend.
//!
//! POSTs `(turn, history)` to the configured inference endpoint and maps
//! the model's name-keyed output back onto node ids. Any transport error,
//! contract violation, or empty concept list routes the request to the
//! heuristic fallback — the pipeline never fails because the model is
//! down.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use dg_domain::schemas::{
    Concept, Coreference, KnowledgeGap, ParseTurnRequest, ParseTurnResponse, Relation,
};
use dg_domain::{Error, Result};

use crate::contract::{ModelParseRequest, ModelParseResponse};
use crate::{HeuristicParser, ParserBackend};

pub struct TransformerParser {
    http: Client,
    inference_url: String,
    fallback: HeuristicParser,
}

impl TransformerParser {
    pub fn new(inference_url: &str, timeout_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            inference_url: inference_url.to_owned(),
            fallback: HeuristicParser::new(),
        })
    }

    async fn call_model(&self, request: &ParseTurnRequest) -> Result<ModelParseResponse> {
        let body = ModelParseRequest {
            tenant_id: request.tenant_id.clone(),
            session_id: request.session_id.clone(),
            turn: request.turn.clone(),
            history: request.history.clone(),
        };
        let response = self
            .http
            .post(&self.inference_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "inference endpoint returned {}",
                response.status()
            )));
        }
        response
            .json::<ModelParseResponse>()
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }
}

/// Map model output onto the parse response, resolving relation endpoints
/// by normalized canonical name. Returns `None` when the model produced no
/// usable concepts (the caller falls back to the heuristic).
pub fn map_model_output(
    request: &ParseTurnRequest,
    extracted: ModelParseResponse,
) -> Option<ParseTurnResponse> {
    let turn_id = request.turn.turn_id.clone();

    let mut concepts: Vec<Concept> = Vec::new();
    let mut id_by_name: HashMap<String, String> = HashMap::new();

    for item in extracted.concepts {
        let canonical_name = item.canonical_name.trim();
        if canonical_name.is_empty() {
            continue;
        }
        let mut concept = Concept::new(canonical_name);
        concept.aliases = item
            .aliases
            .into_iter()
            .filter(|a| !a.trim().is_empty())
            .collect();
        concept.domain = item.domain;
        concept.confidence = item.confidence;
        concept.evidence_turn_ids = vec![turn_id.clone()];
        id_by_name.insert(canonical_name.to_lowercase(), concept.node_id.clone());
        concepts.push(concept);
    }

    if concepts.is_empty() {
        return None;
    }

    let relations: Vec<Relation> = extracted
        .relations
        .into_iter()
        .filter_map(|item| {
            let source = id_by_name.get(&item.source.trim().to_lowercase())?;
            let target = id_by_name.get(&item.target.trim().to_lowercase())?;
            let mut relation = Relation::new(source, target, item.relation_type);
            relation.confidence = item.confidence;
            relation.evidence_turn_ids = vec![turn_id.clone()];
            Some(relation)
        })
        .collect();

    let coreferences: Vec<Coreference> = extracted
        .coreferences
        .into_iter()
        .filter(|item| !item.mention.trim().is_empty() && !item.resolved_to.trim().is_empty())
        .map(|item| Coreference {
            mention: item.mention,
            resolved_to: item.resolved_to,
            confidence: item.confidence,
        })
        .collect();

    let knowledge_gaps: Vec<KnowledgeGap> = extracted
        .knowledge_gaps
        .into_iter()
        .map(|item| {
            KnowledgeGap::new(
                &request.session_id,
                item.gap_type,
                item.priority,
                item.description,
            )
        })
        .collect();

    Some(ParseTurnResponse {
        tenant_id: request.tenant_id.clone(),
        session_id: request.session_id.clone(),
        turn_id,
        concepts,
        relations,
        coreferences,
        knowledge_gaps,
    })
}

#[async_trait]
impl ParserBackend for TransformerParser {
    async fn parse_turn(&self, request: ParseTurnRequest) -> Result<ParseTurnResponse> {
        match self.call_model(&request).await {
            Ok(extracted) => match map_model_output(&request, extracted) {
                Some(response) => Ok(response),
                None => {
                    tracing::debug!(turn = %request.turn.turn_id, "model returned no concepts — falling back");
                    self.fallback.parse_turn(request).await
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "inference call failed — falling back to heuristic");
                self.fallback.parse_turn(request).await
            }
        }
    }

    fn name(&self) -> &'static str {
        "transformer"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
