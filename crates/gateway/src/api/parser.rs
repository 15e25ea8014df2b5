//! Parser service endpoints.

use axum::extract::State;
use axum::response::Json;
use serde_json::json;

use dg_domain::config::ParserBackendKind;
use dg_domain::schemas::{ParseTurnRequest, ParseTurnResponse};

use crate::auth::TenantContext;
use crate::error::ApiError;
use crate::readiness::{check_http_health, summarize_checks};
use crate::state::ParserState;

pub async fn health(State(state): State<ParserState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "parser",
        "backend": state.parser.name(),
    }))
}

pub async fn ready(State(state): State<ParserState>) -> Json<serde_json::Value> {
    let parser_config = &state.config.parser;
    let check = match (parser_config.backend, parser_config.inference_url.as_deref()) {
        (ParserBackendKind::Transformer, Some(url)) => {
            check_http_health(&transformer_health_url(url)).await
        }
        (ParserBackendKind::Transformer, None) => (
            false,
            "parser.inference_url is required for the transformer backend".into(),
        ),
        (ParserBackendKind::Heuristic, _) => (true, "heuristic backend ready".into()),
    };
    let name = match parser_config.backend {
        ParserBackendKind::Transformer => "transformer_backend",
        ParserBackendKind::Heuristic => "heuristic_backend",
    };
    Json(summarize_checks(&[(name, check)]))
}

pub async fn parse_turn(
    State(state): State<ParserState>,
    tenant: TenantContext,
    Json(payload): Json<ParseTurnRequest>,
) -> Result<Json<ParseTurnResponse>, ApiError> {
    if !payload.tenant_id.is_empty() && payload.tenant_id != tenant.tenant_id {
        return Err(ApiError::Forbidden(
            "Tenant mismatch in parse payload".into(),
        ));
    }
    let mut normalized = payload;
    normalized.tenant_id = tenant.tenant_id;
    let response = state.parser.parse_turn(normalized).await?;
    Ok(Json(response))
}

/// `/health` on the inference endpoint's host, keeping scheme and
/// authority. An unparseable URL is probed as-is.
fn transformer_health_url(inference_url: &str) -> String {
    match reqwest::Url::parse(inference_url) {
        Ok(mut url) => {
            url.set_path("/health");
            url.set_query(None);
            url.to_string()
        }
        Err(_) => inference_url.to_owned(),
    }
}
