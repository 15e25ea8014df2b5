//! Per-session deduplicating graph store — the merge algorithm behind the
//! graph service.
//!
//! Concepts dedup by normalized canonical name; relations by
//! `(source, target, type)` after their endpoints are remapped through the
//! batch's id map. Merges take the max confidence and the sorted union of
//! aliases / evidence, so replaying a payload converges and per-turn
//! payloads commute.
//!
//! Writes for one `(tenant, session)` scope run under that scope's
//! exclusive lock from a lock table; snapshots clone, so readers never
//! block writers of other scopes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use dg_domain::schemas::{
    Concept, GraphSnapshot, GraphUpsertRequest, GraphUpsertResponse, Relation, RelationType,
};

/// Concepts keyed by normalized name; relations by `(src, dst, type)`.
#[derive(Default)]
struct ScopeGraph {
    concepts: HashMap<String, Concept>,
    relations: HashMap<(String, String, RelationType), Relation>,
}

#[derive(Default)]
pub struct GraphStore {
    scopes: RwLock<HashMap<String, Arc<Mutex<ScopeGraph>>>>,
}

fn scope_key(tenant_id: &str, session_id: &str) -> String {
    format!("{tenant_id}:{session_id}")
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Sorted union of two string sets.
fn merge_sorted(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing.to_vec();
    merged.extend(incoming.iter().cloned());
    merged.sort();
    merged.dedup();
    merged
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn scope(&self, tenant_id: &str, session_id: &str) -> Arc<Mutex<ScopeGraph>> {
        let key = scope_key(tenant_id, session_id);
        {
            let scopes = self.scopes.read();
            if let Some(scope) = scopes.get(&key) {
                return scope.clone();
            }
        }
        self.scopes
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(ScopeGraph::default())))
            .clone()
    }

    /// Merge a batch of concepts and relations into the scope.
    ///
    /// Deterministic per call: concepts first (building the id map), then
    /// relations with remapped endpoints. Relations whose endpoints are
    /// neither in this batch nor already canonical are dropped silently.
    pub fn upsert(&self, payload: GraphUpsertRequest) -> GraphUpsertResponse {
        let scope = self.scope(&payload.tenant_id, &payload.session_id);
        let mut graph = scope.lock();

        let mut id_map: HashMap<String, String> = HashMap::new();
        let mut added_nodes = 0;
        let mut merged_nodes = 0;

        for concept in payload.concepts {
            let key = normalize(&concept.canonical_name);
            if key.is_empty() {
                continue;
            }
            match graph.concepts.get_mut(&key) {
                Some(existing) => {
                    existing.aliases = merge_sorted(&existing.aliases, &concept.aliases);
                    existing.evidence_turn_ids =
                        merge_sorted(&existing.evidence_turn_ids, &concept.evidence_turn_ids);
                    existing.confidence = existing.confidence.max(concept.confidence);
                    id_map.insert(concept.node_id, existing.node_id.clone());
                    merged_nodes += 1;
                }
                None => {
                    id_map.insert(concept.node_id.clone(), concept.node_id.clone());
                    graph.concepts.insert(key, concept);
                    added_nodes += 1;
                }
            }
        }

        let mut added_edges = 0;
        let mut merged_edges = 0;

        for mut relation in payload.relations {
            let (Some(src), Some(dst)) = (
                id_map.get(&relation.source_node_id),
                id_map.get(&relation.target_node_id),
            ) else {
                continue;
            };
            relation.source_node_id = src.clone();
            relation.target_node_id = dst.clone();

            let key = (src.clone(), dst.clone(), relation.relation_type);
            match graph.relations.get_mut(&key) {
                Some(existing) => {
                    existing.confidence = existing.confidence.max(relation.confidence);
                    existing.evidence_turn_ids =
                        merge_sorted(&existing.evidence_turn_ids, &relation.evidence_turn_ids);
                    merged_edges += 1;
                }
                None => {
                    graph.relations.insert(key, relation);
                    added_edges += 1;
                }
            }
        }

        tracing::debug!(
            tenant = %payload.tenant_id,
            session = %payload.session_id,
            added_nodes,
            merged_nodes,
            added_edges,
            merged_edges,
            "graph upsert"
        );

        GraphUpsertResponse {
            tenant_id: payload.tenant_id,
            session_id: payload.session_id,
            added_nodes,
            merged_nodes,
            added_edges,
            merged_edges,
        }
    }

    /// A copy of the scope's graph, or `None` if the scope has never been
    /// written.
    pub fn snapshot(&self, tenant_id: &str, session_id: &str) -> Option<GraphSnapshot> {
        let key = scope_key(tenant_id, session_id);
        let scope = self.scopes.read().get(&key).cloned()?;
        let graph = scope.lock();
        Some(GraphSnapshot {
            tenant_id: tenant_id.to_owned(),
            session_id: session_id.to_owned(),
            concepts: graph.concepts.values().cloned().collect(),
            relations: graph.relations.values().cloned().collect(),
        })
    }

    pub fn is_ready(&self) -> (bool, String) {
        (true, "memory graph store ready".into())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn concept(name: &str, aliases: &[&str], confidence: f64, evidence: &[&str]) -> Concept {
        let mut c = Concept::new(name);
        c.aliases = aliases.iter().map(|s| s.to_string()).collect();
        c.confidence = confidence;
        c.evidence_turn_ids = evidence.iter().map(|s| s.to_string()).collect();
        c
    }

    fn upsert(
        store: &GraphStore,
        concepts: Vec<Concept>,
        relations: Vec<Relation>,
    ) -> GraphUpsertResponse {
        store.upsert(GraphUpsertRequest {
            tenant_id: "public".into(),
            session_id: "sess_demo".into(),
            concepts,
            relations,
        })
    }

    #[test]
    fn first_occurrence_adds_nodes() {
        let store = GraphStore::new();
        let result = upsert(
            &store,
            vec![concept("Transformer", &[], 0.7, &["turn_1"])],
            vec![],
        );
        assert_eq!(result.added_nodes, 1);
        assert_eq!(result.merged_nodes, 0);
    }

    #[test]
    fn dedup_is_case_and_whitespace_insensitive() {
        let store = GraphStore::new();
        upsert(
            &store,
            vec![concept("Transformers", &["xfmr"], 0.5, &["turn_1"])],
            vec![],
        );
        let result = upsert(
            &store,
            vec![concept("  transformers ", &["TRF"], 0.9, &["turn_2"])],
            vec![],
        );
        assert_eq!(result.added_nodes, 0);
        assert_eq!(result.merged_nodes, 1);

        let snapshot = store.snapshot("public", "sess_demo").unwrap();
        assert_eq!(snapshot.concepts.len(), 1);
        let merged = &snapshot.concepts[0];
        assert_eq!(merged.aliases, vec!["TRF", "xfmr"]);
        assert_eq!(merged.evidence_turn_ids, vec!["turn_1", "turn_2"]);
        assert!((merged.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_canonical_name_is_dropped() {
        let store = GraphStore::new();
        let result = upsert(&store, vec![concept("   ", &[], 0.5, &[])], vec![]);
        assert_eq!(result.added_nodes, 0);
        assert_eq!(result.merged_nodes, 0);
    }

    #[test]
    fn confidence_never_decreases() {
        let store = GraphStore::new();
        upsert(&store, vec![concept("Attention", &[], 0.8, &[])], vec![]);
        upsert(&store, vec![concept("attention", &[], 0.3, &[])], vec![]);

        let snapshot = store.snapshot("public", "sess_demo").unwrap();
        assert!((snapshot.concepts[0].confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn relation_endpoints_remap_to_canonical_ids() {
        let store = GraphStore::new();

        // First batch establishes canonical A and B plus an edge.
        let a1 = concept("Alpha", &[], 0.6, &["turn_1"]);
        let b1 = concept("Beta", &[], 0.6, &["turn_1"]);
        let canonical_a = a1.node_id.clone();
        let canonical_b = b1.node_id.clone();
        let mut r1 = Relation::new(&a1.node_id, &b1.node_id, RelationType::Causal);
        r1.evidence_turn_ids = vec!["turn_1".into()];
        let first = upsert(&store, vec![a1, b1], vec![r1]);
        assert_eq!(first.added_nodes, 2);
        assert_eq!(first.added_edges, 1);

        // Second batch: same names, new ids, new relation between them.
        let a2 = concept("alpha", &[], 0.6, &["turn_2"]);
        let b2 = concept("beta", &[], 0.6, &["turn_2"]);
        let mut r2 = Relation::new(&a2.node_id, &b2.node_id, RelationType::Causal);
        r2.evidence_turn_ids = vec!["turn_2".into()];
        let second = upsert(&store, vec![a2, b2], vec![r2]);
        assert_eq!(second.merged_nodes, 2);
        assert_eq!(second.added_edges, 0);
        assert_eq!(second.merged_edges, 1);

        let snapshot = store.snapshot("public", "sess_demo").unwrap();
        assert_eq!(snapshot.relations.len(), 1);
        let edge = &snapshot.relations[0];
        assert_eq!(edge.source_node_id, canonical_a);
        assert_eq!(edge.target_node_id, canonical_b);
        assert_eq!(edge.evidence_turn_ids, vec!["turn_1", "turn_2"]);
    }

    #[test]
    fn relation_with_unknown_endpoint_is_dropped() {
        let store = GraphStore::new();
        let a = concept("Alpha", &[], 0.6, &[]);
        let rel = Relation::new(&a.node_id, "node_unknown00", RelationType::Dependency);
        let result = upsert(&store, vec![a], vec![rel]);
        assert_eq!(result.added_edges, 0);
        assert_eq!(result.merged_edges, 0);
        assert!(store
            .snapshot("public", "sess_demo")
            .unwrap()
            .relations
            .is_empty());
    }

    #[test]
    fn same_endpoints_different_type_are_distinct_edges() {
        let store = GraphStore::new();
        let a = concept("Alpha", &[], 0.6, &[]);
        let b = concept("Beta", &[], 0.6, &[]);
        let r1 = Relation::new(&a.node_id, &b.node_id, RelationType::Causal);
        let r2 = Relation::new(&a.node_id, &b.node_id, RelationType::Contrast);
        let result = upsert(&store, vec![a, b], vec![r1, r2]);
        assert_eq!(result.added_edges, 2);
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = GraphStore::new();
        let a = concept("Alpha", &["al"], 0.6, &["turn_1"]);
        let b = concept("Beta", &[], 0.7, &["turn_1"]);
        let rel = Relation::new(&a.node_id, &b.node_id, RelationType::Definition);
        let payload = GraphUpsertRequest {
            tenant_id: "public".into(),
            session_id: "sess_demo".into(),
            concepts: vec![a, b],
            relations: vec![rel],
        };

        store.upsert(payload.clone());
        let once = store.snapshot("public", "sess_demo").unwrap();
        store.upsert(payload);
        let twice = store.snapshot("public", "sess_demo").unwrap();

        assert_eq!(once.concepts.len(), twice.concepts.len());
        assert_eq!(once.relations.len(), twice.relations.len());
        for concept in &once.concepts {
            let other = twice
                .concepts
                .iter()
                .find(|c| c.node_id == concept.node_id)
                .unwrap();
            assert_eq!(other.aliases, concept.aliases);
            assert_eq!(other.evidence_turn_ids, concept.evidence_turn_ids);
            assert!((other.confidence - concept.confidence).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn per_turn_payloads_commute() {
        let make_payloads = || {
            let a1 = concept("Alpha", &["a"], 0.5, &["turn_1"]);
            let p1 = GraphUpsertRequest {
                tenant_id: "public".into(),
                session_id: "sess_demo".into(),
                concepts: vec![a1],
                relations: vec![],
            };
            let a2 = concept("alpha", &["A."], 0.8, &["turn_2"]);
            let p2 = GraphUpsertRequest {
                tenant_id: "public".into(),
                session_id: "sess_demo".into(),
                concepts: vec![a2],
                relations: vec![],
            };
            (p1, p2)
        };

        let forward = GraphStore::new();
        let (p1, p2) = make_payloads();
        forward.upsert(p1);
        forward.upsert(p2);

        let reverse = GraphStore::new();
        let (p1, p2) = make_payloads();
        reverse.upsert(p2);
        reverse.upsert(p1);

        let f = forward.snapshot("public", "sess_demo").unwrap();
        let r = reverse.snapshot("public", "sess_demo").unwrap();
        assert_eq!(f.concepts.len(), 1);
        assert_eq!(r.concepts.len(), 1);
        assert_eq!(f.concepts[0].aliases, r.concepts[0].aliases);
        assert_eq!(
            f.concepts[0].evidence_turn_ids,
            r.concepts[0].evidence_turn_ids
        );
        assert!((f.concepts[0].confidence - r.concepts[0].confidence).abs() < f64::EPSILON);
    }

    #[test]
    fn scopes_are_isolated_by_tenant() {
        let store = GraphStore::new();
        store.upsert(GraphUpsertRequest {
            tenant_id: "t1".into(),
            session_id: "sess_shared".into(),
            concepts: vec![concept("Alpha", &[], 0.5, &[])],
            relations: vec![],
        });

        assert!(store.snapshot("t2", "sess_shared").is_none());
        assert_eq!(
            store.snapshot("t1", "sess_shared").unwrap().concepts.len(),
            1
        );
    }

    #[test]
    fn snapshot_of_unknown_scope_is_none() {
        let store = GraphStore::new();
        assert!(store.snapshot("public", "sess_nope").is_none());
    }
}
