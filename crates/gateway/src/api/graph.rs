//! Graph service endpoints.

use axum::extract::{Path, State};
use axum::response::Json;
use serde_json::json;

use dg_domain::schemas::{GraphSnapshot, GraphUpsertRequest, GraphUpsertResponse};

use crate::auth::TenantContext;
use crate::error::ApiError;
use crate::state::GraphState;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "graph" }))
}

pub async fn upsert(
    State(state): State<GraphState>,
    tenant: TenantContext,
    Json(payload): Json<GraphUpsertRequest>,
) -> Result<Json<GraphUpsertResponse>, ApiError> {
    if !payload.tenant_id.is_empty() && payload.tenant_id != tenant.tenant_id {
        return Err(ApiError::Forbidden(
            "Tenant mismatch in graph upsert payload".into(),
        ));
    }
    let mut normalized = payload;
    normalized.tenant_id = tenant.tenant_id;
    Ok(Json(state.graph.upsert(normalized)))
}

pub async fn get_graph(
    State(state): State<GraphState>,
    Path(session_id): Path<String>,
    tenant: TenantContext,
) -> Result<Json<GraphSnapshot>, ApiError> {
    state
        .graph
        .snapshot(&tenant.tenant_id, &session_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Session graph not found".into()))
}
