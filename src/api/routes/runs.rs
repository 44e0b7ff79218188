use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::api::models::{AnnotateRequest, ListQuery};
use crate::api::AppState;
use crate::errors::NightshiftError;
use crate::models::AgentRunResult;
use crate::store::{AgentStore, RunHistoryStore};

const MAX_RUNS: usize = 200;

pub async fn list_runs(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, NightshiftError> {
    if state.db.get_agent(&agent_id)?.is_none() {
        return Err(NightshiftError::NotFound(format!("agent '{}'", agent_id)));
    }
    let limit = query.limit.unwrap_or(20).min(MAX_RUNS);
    let runs = state.db.list_runs(&agent_id, limit)?;
    Ok(Json(json!({ "total": runs.len(), "runs": runs })))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentRunResult>, NightshiftError> {
    state
        .db
        .get_run(&id)?
        .map(Json)
        .ok_or_else(|| NightshiftError::NotFound(format!("run '{}'", id)))
}

pub async fn annotate_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AnnotateRequest>,
) -> Result<Json<AgentRunResult>, NightshiftError> {
    Ok(Json(state.db.annotate_run(&id, &req.note)?))
}
