//! Suggestion service endpoints.

use axum::extract::State;
use axum::response::Json;
use serde_json::json;

use dg_domain::schemas::{SuggestionRequest, SuggestionResponse};

use crate::auth::TenantContext;
use crate::error::ApiError;
use crate::state::SuggestionState;
use crate::suggest;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "suggestion" }))
}

pub async fn suggest_questions(
    State(_state): State<SuggestionState>,
    tenant: TenantContext,
    Json(payload): Json<SuggestionRequest>,
) -> Result<Json<SuggestionResponse>, ApiError> {
    if !payload.tenant_id.is_empty() && payload.tenant_id != tenant.tenant_id {
        return Err(ApiError::Forbidden(
            "Tenant mismatch in suggestion payload".into(),
        ));
    }
    Ok(Json(SuggestionResponse {
        tenant_id: tenant.tenant_id,
        session_id: payload.session_id,
        suggestions: suggest::rank(payload.knowledge_gaps),
    }))
}
