//! Routers for the four services.
//!
//! Every service exposes `/health`; the dialogue service adds `/ready` and
//! the session/turn/job surface, the others their single domain endpoint
//! each.

pub mod dialogue;
pub mod graph;
pub mod parser;
pub mod suggestion;

use axum::routing::{get, post};
use axum::Router;

use crate::state::{DialogueState, GraphState, ParserState, SuggestionState};

pub fn dialogue_router(state: DialogueState) -> Router {
    Router::new()
        .route("/health", get(dialogue::health))
        .route("/ready", get(dialogue::ready))
        .route("/v1/sessions", post(dialogue::create_session))
        .route(
            "/v1/sessions/:session_id/turns",
            get(dialogue::list_turns).post(dialogue::add_turn),
        )
        .route(
            "/v1/sessions/:session_id/turns/async",
            post(dialogue::add_turn_async),
        )
        .route("/v1/pipeline/jobs/:job_id", get(dialogue::get_job))
        .route(
            "/v1/sessions/:session_id/context-path",
            get(dialogue::context_path),
        )
        .route("/v1/sessions/:session_id/graph", get(dialogue::session_graph))
        .with_state(state)
}

pub fn parser_router(state: ParserState) -> Router {
    Router::new()
        .route("/health", get(parser::health))
        .route("/ready", get(parser::ready))
        .route("/v1/parse/turn", post(parser::parse_turn))
        .with_state(state)
}

pub fn graph_router(state: GraphState) -> Router {
    Router::new()
        .route("/health", get(graph::health))
        .route("/v1/graph/upsert", post(graph::upsert))
        .route("/v1/graph/:session_id", get(graph::get_graph))
        .with_state(state)
}

pub fn suggestion_router(state: SuggestionState) -> Router {
    Router::new()
        .route("/health", get(suggestion::health))
        .route("/v1/suggestions/questions", post(suggestion::suggest_questions))
        .with_state(state)
}
