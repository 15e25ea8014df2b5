//! Regex heuristic parser.
//!
//! Extraction rules, in order:
//! 1. Concepts: capitalized multi-word phrases first, then standalone
//!    tokens of length ≥ 5 that are not on the stop list; deduped
//!    case-insensitively.
//! 2. Relation: with ≥ 2 concepts, the first marker found in the
//!    lowercased text picks the type, and one relation links the first two
//!    concepts. The markers are plain substring matches — `"is"` matches
//!    inside `"this"` — which is deliberate; tightening to word boundaries
//!    would change extraction results.
//! 3. Coreference: each pronoun resolves to the most recent remembered
//!    concept name for the scope (last 50 names seen).
//! 4. Gaps: unresolved pronouns, underspecified questions, and multi-
//!    concept "why" claims without a "because".

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;

use dg_domain::schemas::{
    Concept, Coreference, GapType, KnowledgeGap, ParseTurnRequest, ParseTurnResponse, Relation,
    RelationType,
};
use dg_domain::Result;

use crate::ParserBackend;

const STOP_WORDS: [&str; 9] = [
    "what", "when", "where", "which", "with", "that", "this", "from", "into",
];

const MEMORY_WINDOW: usize = 50;

const RELATION_MARKERS: [(&[&str], RelationType); 5] = [
    (&["because", "leads to", "causes"], RelationType::Causal),
    (&["before", "after", "then"], RelationType::Chronology),
    (&["however", "while", "in contrast"], RelationType::Contrast),
    (&["depends on", "require"], RelationType::Dependency),
    (&["is", "means"], RelationType::Definition),
];

pub struct HeuristicParser {
    phrase_re: Regex,
    token_re: Regex,
    pronoun_re: Regex,
    /// Last concept names seen per `(tenant, session)` scope.
    memory: Mutex<HashMap<String, Vec<String>>>,
}

impl Default for HeuristicParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicParser {
    pub fn new() -> Self {
        Self {
            phrase_re: Regex::new(r"[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+")
                .expect("static phrase pattern"),
            token_re: Regex::new(r"[A-Za-z][A-Za-z0-9_\-]{2,}").expect("static token pattern"),
            pronoun_re: Regex::new(r"\b(this|that|it|they|these|those)\b")
                .expect("static pronoun pattern"),
            memory: Mutex::new(HashMap::new()),
        }
    }

    fn memory_key(tenant_id: &str, session_id: &str) -> String {
        format!("{tenant_id}:{session_id}")
    }

    fn extract_concepts(&self, text: &str, turn_id: &str) -> Vec<Concept> {
        let mut concepts = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for phrase in self.phrase_re.find_iter(text) {
            let key = phrase.as_str().to_lowercase();
            if !seen.insert(key) {
                continue;
            }
            let mut concept = Concept::new(phrase.as_str());
            concept.confidence = 0.72;
            concept.evidence_turn_ids = vec![turn_id.to_owned()];
            concepts.push(concept);
        }

        for token in self.token_re.find_iter(text) {
            let low = token.as_str().to_lowercase();
            if low.len() < 5 || seen.contains(&low) || STOP_WORDS.contains(&low.as_str()) {
                continue;
            }
            seen.insert(low);
            let mut concept = Concept::new(token.as_str());
            concept.confidence = 0.58;
            concept.evidence_turn_ids = vec![turn_id.to_owned()];
            concepts.push(concept);
        }

        concepts
    }

    fn extract_relation(
        &self,
        text: &str,
        concepts: &[Concept],
        turn_id: &str,
    ) -> Option<Relation> {
        if concepts.len() < 2 {
            return None;
        }
        let low = text.to_lowercase();
        let relation_type = RELATION_MARKERS
            .iter()
            .find(|(markers, _)| markers.iter().any(|m| low.contains(m)))
            .map(|(_, rt)| *rt)?;

        let mut relation = Relation::new(
            &concepts[0].node_id,
            &concepts[1].node_id,
            relation_type,
        );
        relation.confidence = 0.6;
        relation.evidence_turn_ids = vec![turn_id.to_owned()];
        Some(relation)
    }

    fn resolve_coreferences(
        &self,
        tenant_id: &str,
        session_id: &str,
        text: &str,
    ) -> Vec<Coreference> {
        let low = text.to_lowercase();
        let mentions: Vec<&str> = self
            .pronoun_re
            .find_iter(&low)
            .map(|m| m.as_str())
            .collect();
        if mentions.is_empty() {
            return Vec::new();
        }

        let memory = self.memory.lock();
        let Some(antecedent) = memory
            .get(&Self::memory_key(tenant_id, session_id))
            .and_then(|names| names.last())
        else {
            return Vec::new();
        };

        mentions
            .into_iter()
            .map(|mention| Coreference {
                mention: mention.to_owned(),
                resolved_to: antecedent.clone(),
                confidence: 0.67,
            })
            .collect()
    }

    fn build_gaps(
        &self,
        session_id: &str,
        text: &str,
        concepts: &[Concept],
        coreferences: &[Coreference],
    ) -> Vec<KnowledgeGap> {
        let low = text.to_lowercase();
        let mut gaps = Vec::new();

        if self.pronoun_re.is_match(&low) && coreferences.is_empty() {
            gaps.push(KnowledgeGap::new(
                session_id,
                GapType::AmbiguousReference,
                3,
                "Pronoun reference is unresolved in current context.",
            ));
        }

        if text.contains('?') && concepts.len() <= 1 {
            gaps.push(KnowledgeGap::new(
                session_id,
                GapType::MissingPrerequisite,
                2,
                "Question appears underspecified; prerequisite concepts are missing.",
            ));
        }

        if concepts.len() >= 3 && !low.contains("because") && low.contains("why") {
            gaps.push(KnowledgeGap::new(
                session_id,
                GapType::WeakEvidence,
                1,
                "Claim includes multiple concepts but little explicit evidence linkage.",
            ));
        }

        gaps
    }

    fn remember(&self, tenant_id: &str, session_id: &str, concepts: &[Concept]) {
        if concepts.is_empty() {
            return;
        }
        let mut memory = self.memory.lock();
        let names = memory
            .entry(Self::memory_key(tenant_id, session_id))
            .or_default();
        names.extend(concepts.iter().map(|c| c.canonical_name.clone()));
        if names.len() > MEMORY_WINDOW {
            names.drain(..names.len() - MEMORY_WINDOW);
        }
    }
}

#[async_trait]
impl ParserBackend for HeuristicParser {
    async fn parse_turn(&self, request: ParseTurnRequest) -> Result<ParseTurnResponse> {
        let turn = &request.turn;
        let concepts = self.extract_concepts(&turn.content, &turn.turn_id);
        let relations = self
            .extract_relation(&turn.content, &concepts, &turn.turn_id)
            .into_iter()
            .collect();
        let coreferences =
            self.resolve_coreferences(&request.tenant_id, &request.session_id, &turn.content);
        let knowledge_gaps =
            self.build_gaps(&request.session_id, &turn.content, &concepts, &coreferences);

        self.remember(&request.tenant_id, &request.session_id, &concepts);

        Ok(ParseTurnResponse {
            tenant_id: request.tenant_id,
            session_id: request.session_id,
            turn_id: turn.turn_id.clone(),
            concepts,
            relations,
            coreferences,
            knowledge_gaps,
        })
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
