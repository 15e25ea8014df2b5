//! Dialogue orchestrator endpoints.
//!
//! Owns sessions and turns, runs the pipeline synchronously in the request
//! path, and hands async submissions to the ingest worker via the event
//! bus.

use axum::extract::{Path, State};
use axum::response::Json;
use serde_json::json;

use dg_bus::topics;
use dg_domain::schemas::{
    AsyncJobStatus, AsyncTurnAccepted, AsyncTurnJob, DialogueTurnResponse, GraphSnapshot,
    Session, SessionCreate, Turn, TurnCreate, utc_now,
};

use crate::auth::{ensure_tenant_access, TenantContext};
use crate::error::ApiError;
use crate::readiness::{check_http_health, summarize_checks};
use crate::state::DialogueState;
use crate::worker::IngestPayload;

/// How many trailing turns ride along as parser history.
const HISTORY_WINDOW: usize = 12;

pub async fn health(State(state): State<DialogueState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "dialogue",
        "async_pipeline_enabled": state.config.pipeline.async_enabled,
        "session_store_backend": state.config.stores.session_backend,
        "job_store_backend": state.config.stores.job_backend,
    }))
}

pub async fn ready(State(state): State<DialogueState>) -> Json<serde_json::Value> {
    let downstream = &state.config.downstream;
    let parser = check_http_health(&format!("{}/health", downstream.parser_url)).await;
    let graph = check_http_health(&format!("{}/health", downstream.graph_url)).await;
    let suggestion = check_http_health(&format!("{}/health", downstream.suggestion_url)).await;

    let bus = match state
        .bus
        .publish(
            topics::HEALTH_PING,
            json!({ "sent_at": utc_now() }),
            Some("dialogue"),
        )
        .await
    {
        Ok(_) => (true, "event bus ready".to_string()),
        Err(e) => (false, format!("event bus not ready: {e}")),
    };

    let checks = [
        ("parser_service", parser),
        ("graph_service", graph),
        ("suggestion_service", suggestion),
        ("session_store", state.sessions.is_ready()),
        ("job_store", state.jobs.is_ready()),
        ("event_bus", bus),
    ];
    Json(summarize_checks(&checks))
}

pub async fn create_session(
    State(state): State<DialogueState>,
    tenant: TenantContext,
    Json(payload): Json<SessionCreate>,
) -> Result<Json<Session>, ApiError> {
    if let Some(payload_tenant) = &payload.tenant_id {
        ensure_tenant_access(payload_tenant, &tenant)?;
    }
    let session = Session::new(tenant.tenant_id, payload.user_id, payload.metadata);
    state.sessions.create_session(&session)?;
    tracing::info!(session = %session.session_id, tenant = %session.tenant_id, "session created");
    Ok(Json(session))
}

pub async fn list_turns(
    State(state): State<DialogueState>,
    Path(session_id): Path<String>,
    tenant: TenantContext,
) -> Result<Json<Vec<Turn>>, ApiError> {
    require_session(&state, &tenant.tenant_id, &session_id)?;
    Ok(Json(materialize_turns(
        &state,
        &tenant.tenant_id,
        &session_id,
    )?))
}

pub async fn add_turn(
    State(state): State<DialogueState>,
    Path(session_id): Path<String>,
    tenant: TenantContext,
    Json(payload): Json<TurnCreate>,
) -> Result<Json<DialogueTurnResponse>, ApiError> {
    require_session(&state, &tenant.tenant_id, &session_id)?;

    // History is read before the append: it excludes the turn being added.
    let history = trailing_history(&state, &tenant.tenant_id, &session_id)?;
    let turn = Turn::new(tenant.tenant_id.clone(), session_id.clone(), payload);
    store_turn(&state, &turn)?;

    let response = state
        .pipeline
        .run(
            &tenant.tenant_id,
            &session_id,
            turn,
            history,
            tenant.api_key.as_deref(),
        )
        .await?;

    if let Err(e) = state
        .bus
        .publish(
            topics::TURN_PROCESSED,
            json!({
                "tenant_id": tenant.tenant_id,
                "session_id": session_id,
                "turn_id": response.turn.turn_id,
                "status": AsyncJobStatus::Completed,
            }),
            None,
        )
        .await
    {
        tracing::warn!(error = %e, "turn.processed publish failed");
    }
    Ok(Json(response))
}

pub async fn add_turn_async(
    State(state): State<DialogueState>,
    Path(session_id): Path<String>,
    tenant: TenantContext,
    Json(payload): Json<TurnCreate>,
) -> Result<Json<AsyncTurnAccepted>, ApiError> {
    if !state.config.pipeline.async_enabled {
        return Err(ApiError::Conflict("Async pipeline is disabled".into()));
    }
    require_session(&state, &tenant.tenant_id, &session_id)?;

    let history = trailing_history(&state, &tenant.tenant_id, &session_id)?;
    let turn = Turn::new(tenant.tenant_id.clone(), session_id.clone(), payload);
    store_turn(&state, &turn)?;

    let job = AsyncTurnJob::queued(&tenant.tenant_id, &session_id, &turn.turn_id);
    state.jobs.create_job(&job)?;

    let ingest = IngestPayload {
        job_id: job.job_id.clone(),
        tenant_id: tenant.tenant_id.clone(),
        session_id: session_id.clone(),
        turn: turn.clone(),
        history,
        api_key: tenant.api_key.clone(),
    };
    state
        .bus
        .publish(
            topics::TURN_INGESTED,
            serde_json::to_value(&ingest).map_err(dg_domain::Error::from)?,
            Some(&turn.turn_id),
        )
        .await?;

    tracing::info!(job = %job.job_id, turn = %turn.turn_id, "async turn accepted");
    Ok(Json(AsyncTurnAccepted {
        job_id: job.job_id,
        tenant_id: tenant.tenant_id,
        session_id,
        turn_id: turn.turn_id,
        status: AsyncJobStatus::Queued,
    }))
}

pub async fn get_job(
    State(state): State<DialogueState>,
    Path(job_id): Path<String>,
    tenant: TenantContext,
) -> Result<Json<AsyncTurnJob>, ApiError> {
    let job = state
        .jobs
        .get_job(&job_id)?
        .ok_or_else(|| ApiError::NotFound("Job not found".into()))?;
    ensure_tenant_access(&job.tenant_id, &tenant)?;
    Ok(Json(job))
}

pub async fn context_path(
    State(state): State<DialogueState>,
    Path(session_id): Path<String>,
    tenant: TenantContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_session(&state, &tenant.tenant_id, &session_id)?;
    let path: Vec<serde_json::Value> = state
        .sessions
        .list_turns(&tenant.tenant_id, &session_id)?
        .into_iter()
        .map(|row| {
            json!({
                "turn_id": row.turn_id,
                "speaker": row.speaker,
                "parent_turn_id": row.parent_turn_id,
            })
        })
        .collect();
    Ok(Json(json!({ "session_id": session_id, "path": path })))
}

pub async fn session_graph(
    State(state): State<DialogueState>,
    Path(session_id): Path<String>,
    tenant: TenantContext,
) -> Result<Json<GraphSnapshot>, ApiError> {
    require_session(&state, &tenant.tenant_id, &session_id)?;
    let snapshot = state
        .downstreams
        .graph_snapshot(&tenant.tenant_id, &session_id, tenant.api_key.as_deref())
        .await?;
    Ok(Json(snapshot))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn require_session(
    state: &DialogueState,
    tenant_id: &str,
    session_id: &str,
) -> Result<Session, ApiError> {
    state
        .sessions
        .get_session(tenant_id, session_id)?
        .ok_or_else(|| ApiError::NotFound("Session not found".into()))
}

fn store_turn(state: &DialogueState, turn: &Turn) -> Result<(), ApiError> {
    let ciphertext = state.cipher.encrypt(&turn.content);
    state.sessions.append_turn(turn, &ciphertext)?;
    Ok(())
}

/// Decrypt stored turns back into wire shape, keeping store order.
fn materialize_turns(
    state: &DialogueState,
    tenant_id: &str,
    session_id: &str,
) -> Result<Vec<Turn>, ApiError> {
    let rows = state.sessions.list_turns(tenant_id, session_id)?;
    Ok(rows
        .into_iter()
        .map(|row| Turn {
            turn_id: row.turn_id,
            tenant_id: row.tenant_id,
            session_id: row.session_id,
            speaker: row.speaker,
            content: state.cipher.decrypt(&row.content_ciphertext),
            parent_turn_id: row.parent_turn_id,
            created_at: row.created_at,
        })
        .collect())
}

fn trailing_history(
    state: &DialogueState,
    tenant_id: &str,
    session_id: &str,
) -> Result<Vec<Turn>, ApiError> {
    let mut turns = materialize_turns(state, tenant_id, session_id)?;
    if turns.len() > HISTORY_WINDOW {
        turns.drain(..turns.len() - HISTORY_WINDOW);
    }
    Ok(turns)
}
