//! Shared per-service state passed to the API handlers.
//!
//! Each service gets its own state struct; all of them expose the auth
//! section so the [`TenantContext`](crate::auth::TenantContext) extractor
//! works uniformly.

use std::sync::Arc;

use dg_bus::EventBus;
use dg_domain::config::{AuthConfig, Config};
use dg_graph::GraphStore;
use dg_parser::ParserBackend;
use dg_stores::{ContentCipher, JobStore, SessionStore};

use crate::auth::AuthProvider;
use crate::pipeline::{Downstreams, PipelineRunner};

/// State of the dialogue orchestrator.
#[derive(Clone)]
pub struct DialogueState {
    pub config: Arc<Config>,
    pub bus: Arc<dyn EventBus>,
    pub cipher: Arc<ContentCipher>,
    pub sessions: Arc<dyn SessionStore>,
    pub jobs: Arc<dyn JobStore>,
    /// Parse → graph upsert → suggest, behind a seam so the worker tests
    /// can inject failures.
    pub pipeline: Arc<dyn PipelineRunner>,
    /// Raw downstream client for the graph snapshot proxy.
    pub downstreams: Arc<Downstreams>,
}

impl AuthProvider for DialogueState {
    fn auth_config(&self) -> &AuthConfig {
        &self.config.auth
    }
}

/// State of the parser service.
#[derive(Clone)]
pub struct ParserState {
    pub config: Arc<Config>,
    pub parser: Arc<dyn ParserBackend>,
}

impl AuthProvider for ParserState {
    fn auth_config(&self) -> &AuthConfig {
        &self.config.auth
    }
}

/// State of the graph service.
#[derive(Clone)]
pub struct GraphState {
    pub config: Arc<Config>,
    pub graph: Arc<GraphStore>,
}

impl AuthProvider for GraphState {
    fn auth_config(&self) -> &AuthConfig {
        &self.config.auth
    }
}

/// State of the suggestion service.
#[derive(Clone)]
pub struct SuggestionState {
    pub config: Arc<Config>,
}

impl AuthProvider for SuggestionState {
    fn auth_config(&self) -> &AuthConfig {
        &self.config.auth
    }
}
