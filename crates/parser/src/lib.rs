//! Parser backends: turn + history in, extraction out.
//!
//! Two implementations share the [`ParserBackend`] contract: a regex
//! heuristic that runs anywhere, and a remote transformer client that
//! falls back to the heuristic whenever the model is unreachable or its
//! output fails the contract.

use std::sync::Arc;

use async_trait::async_trait;

use dg_domain::config::{ParserBackendKind, ParserConfig};
use dg_domain::schemas::{ParseTurnRequest, ParseTurnResponse};
use dg_domain::Result;

pub mod contract;
pub mod heuristic;
pub mod transformer;

pub use heuristic::HeuristicParser;
pub use transformer::TransformerParser;

#[async_trait]
pub trait ParserBackend: Send + Sync {
    async fn parse_turn(&self, request: ParseTurnRequest) -> Result<ParseTurnResponse>;

    /// Short backend name for health reporting.
    fn name(&self) -> &'static str;
}

/// Build the configured parser backend. A transformer selection without an
/// inference URL degrades to the heuristic.
pub fn build_parser_backend(config: &ParserConfig) -> Result<Arc<dyn ParserBackend>> {
    match (config.backend, config.inference_url.as_deref()) {
        (ParserBackendKind::Transformer, Some(url)) => Ok(Arc::new(TransformerParser::new(
            url,
            config.timeout_ms,
        )?)),
        (ParserBackendKind::Transformer, None) => {
            tracing::warn!("transformer backend selected without inference_url — using heuristic");
            Ok(Arc::new(HeuristicParser::new()))
        }
        (ParserBackendKind::Heuristic, _) => Ok(Arc::new(HeuristicParser::new())),
    }
}
