//! End-to-end exercise of the sync pipeline: the three downstream services
//! run on ephemeral loopback listeners and the dialogue service is driven
//! over real HTTP.

use std::sync::Arc;

use axum::Router;
use serde_json::json;

use dg_bus::InMemoryEventBus;
use dg_domain::config::Config;
use dg_gateway::api;
use dg_gateway::pipeline::Downstreams;
use dg_gateway::state::{DialogueState, GraphState, ParserState, SuggestionState};
use dg_graph::GraphStore;
use dg_parser::HeuristicParser;
use dg_stores::{ContentCipher, MemoryJobStore, MemorySessionStore};

async fn spawn_service(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Boot parser + graph + suggestion on ephemeral ports, then a dialogue
/// service wired to them. Returns the dialogue base URL.
async fn start_stack(async_enabled: bool) -> String {
    let downstream_config = Arc::new(Config::default());

    let parser_url = spawn_service(api::parser_router(ParserState {
        config: downstream_config.clone(),
        parser: Arc::new(HeuristicParser::new()),
    }))
    .await;
    let graph_url = spawn_service(api::graph_router(GraphState {
        config: downstream_config.clone(),
        graph: Arc::new(GraphStore::new()),
    }))
    .await;
    let suggestion_url = spawn_service(api::suggestion_router(SuggestionState {
        config: downstream_config.clone(),
    }))
    .await;

    let mut config = Config::default();
    config.downstream.parser_url = parser_url;
    config.downstream.graph_url = graph_url;
    config.downstream.suggestion_url = suggestion_url;
    config.pipeline.async_enabled = async_enabled;
    let config = Arc::new(config);

    let downstreams = Arc::new(Downstreams::new(&config.downstream).unwrap());
    let state = DialogueState {
        config,
        bus: Arc::new(InMemoryEventBus::new()),
        cipher: Arc::new(ContentCipher::disabled()),
        sessions: Arc::new(MemorySessionStore::new()),
        jobs: Arc::new(MemoryJobStore::new()),
        pipeline: downstreams.clone(),
        downstreams,
    };
    spawn_service(api::dialogue_router(state)).await
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn create_session(base: &str, tenant: &str) -> String {
    let response = client()
        .post(format!("{base}/v1/sessions"))
        .header("X-Tenant-ID", tenant)
        .json(&json!({ "user_id": "u1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json::<serde_json::Value>().await.unwrap()["session_id"]
        .as_str()
        .unwrap()
        .to_owned()
}

#[tokio::test]
async fn sync_happy_path() {
    let base = start_stack(false).await;
    let session_id = create_session(&base, "public").await;

    let response = client()
        .post(format!("{base}/v1/sessions/{session_id}/turns"))
        .header("X-Tenant-ID", "public")
        .json(&json!({
            "speaker": "user",
            "content": "Transformer models improve retrieval because they encode context.",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();

    let concepts = body["parse"]["concepts"].as_array().unwrap();
    assert!(concepts.len() >= 2);
    assert!(concepts
        .iter()
        .any(|c| c["canonical_name"] == "Transformer"));

    let relations = body["parse"]["relations"].as_array().unwrap();
    assert!(!relations.is_empty());
    assert_eq!(relations[0]["relation_type"], "causal");

    assert!(body["graph_update"]["added_nodes"].as_u64().unwrap() >= 2);
    assert!(!body["suggested_questions"].as_array().unwrap().is_empty());

    // The turn is listed back, decrypted, in append order.
    let turns: serde_json::Value = client()
        .get(format!("{base}/v1/sessions/{session_id}/turns"))
        .header("X-Tenant-ID", "public")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let turns = turns.as_array().unwrap();
    assert_eq!(turns.len(), 1);
    assert!(turns[0]["content"]
        .as_str()
        .unwrap()
        .starts_with("Transformer models"));

    // The graph proxy serves the merged snapshot.
    let graph: serde_json::Value = client()
        .get(format!("{base}/v1/sessions/{session_id}/graph"))
        .header("X-Tenant-ID", "public")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(graph["concepts"].as_array().unwrap().len() >= 2);

    // Context path mirrors the turn sequence.
    let path: serde_json::Value = client()
        .get(format!("{base}/v1/sessions/{session_id}/context-path"))
        .header("X-Tenant-ID", "public")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(path["path"].as_array().unwrap().len(), 1);
    assert_eq!(path["path"][0]["speaker"], "user");
}

#[tokio::test]
async fn unknown_session_is_404() {
    let base = start_stack(false).await;
    let response = client()
        .post(format!("{base}/v1/sessions/sess_missing0000/turns"))
        .header("X-Tenant-ID", "public")
        .json(&json!({ "speaker": "user", "content": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn async_submission_conflicts_when_disabled() {
    let base = start_stack(false).await;
    let session_id = create_session(&base, "public").await;

    let response = client()
        .post(format!("{base}/v1/sessions/{session_id}/turns/async"))
        .header("X-Tenant-ID", "public")
        .json(&json!({ "speaker": "user", "content": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn job_access_is_tenant_scoped() {
    let base = start_stack(true).await;
    let session_id = create_session(&base, "public").await;

    let accepted: serde_json::Value = client()
        .post(format!("{base}/v1/sessions/{session_id}/turns/async"))
        .header("X-Tenant-ID", "public")
        .json(&json!({ "speaker": "user", "content": "hello" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = accepted["job_id"].as_str().unwrap();
    assert_eq!(accepted["status"], "queued");

    // The owning tenant can read the job.
    let own = client()
        .get(format!("{base}/v1/pipeline/jobs/{job_id}"))
        .header("X-Tenant-ID", "public")
        .send()
        .await
        .unwrap();
    assert_eq!(own.status(), 200);

    // Another tenant gets 403.
    let foreign = client()
        .get(format!("{base}/v1/pipeline/jobs/{job_id}"))
        .header("X-Tenant-ID", "other")
        .send()
        .await
        .unwrap();
    assert_eq!(foreign.status(), 403);

    // A missing job is 404.
    let missing = client()
        .get(format!("{base}/v1/pipeline/jobs/job_missing00000"))
        .header("X-Tenant-ID", "public")
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}
