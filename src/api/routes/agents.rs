use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::api::models::AgentResponse;
use crate::api::AppState;
use crate::errors::NightshiftError;
use crate::models::{Agent, AgentPatch, AgentStatus, CreateAgentParams};
use crate::scheduler::Submission;
use crate::store::AgentStore;

fn with_run_state(state: &AppState, agent: Agent) -> AgentResponse {
    let active_run_id = state.scheduler.registry().active_run(&agent.id).map(|(id, _)| id);
    AgentResponse {
        agent,
        running: active_run_id.is_some(),
        active_run_id,
    }
}

fn load(state: &AppState, id: &str) -> Result<Agent, NightshiftError> {
    state
        .db
        .get_agent(id)?
        .ok_or_else(|| NightshiftError::NotFound(format!("agent '{}'", id)))
}

/// Hand the stored definition to the scheduler and return it with its fresh `nextRun`.
fn register(state: &AppState, agent: Agent) -> Result<AgentResponse, NightshiftError> {
    let id = agent.id.clone();
    state.scheduler.register(agent)?;
    Ok(with_run_state(state, load(state, &id)?))
}

pub async fn list_agents(State(state): State<AppState>) -> Result<Json<Value>, NightshiftError> {
    let agents: Vec<AgentResponse> = state
        .db
        .list_agents()?
        .into_iter()
        .map(|agent| with_run_state(&state, agent))
        .collect();
    Ok(Json(json!({ "total": agents.len(), "agents": agents })))
}

pub async fn create_agent(
    State(state): State<AppState>,
    Json(params): Json<CreateAgentParams>,
) -> Result<(StatusCode, Json<AgentResponse>), NightshiftError> {
    let agent = state.db.create_agent(params)?;
    info!(agent_id = %agent.id, name = %agent.name, "Agent created");
    Ok((StatusCode::CREATED, Json(register(&state, agent)?)))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentResponse>, NightshiftError> {
    let agent = load(&state, &id)?;
    Ok(Json(with_run_state(&state, agent)))
}

/// Clients may only pause or un-pause; every other status follows the runs.
/// Un-pausing while a run is still in flight lands on `running`.
fn requested_status(state: &AppState, id: &str, status: AgentStatus) -> Result<AgentStatus, NightshiftError> {
    match status {
        AgentStatus::Paused => Ok(AgentStatus::Paused),
        AgentStatus::Idle if state.scheduler.registry().is_running(id) => Ok(AgentStatus::Running),
        AgentStatus::Idle => Ok(AgentStatus::Idle),
        other => Err(NightshiftError::Validation(format!(
            "status '{}' is set by the scheduler; only 'paused' and 'idle' can be requested",
            other
        ))),
    }
}

pub async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut patch): Json<AgentPatch>,
) -> Result<Json<AgentResponse>, NightshiftError> {
    if let Some(status) = patch.status {
        patch.status = Some(requested_status(&state, &id, status)?);
    }
    let agent = state.db.update_agent(&id, patch)?;
    info!(agent_id = %id, "Agent updated");
    Ok(Json(register(&state, agent)?))
}

pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, NightshiftError> {
    state.scheduler.unregister(&id);
    if !state.db.delete_agent(&id)? {
        return Err(NightshiftError::NotFound(format!("agent '{}'", id)));
    }
    info!(agent_id = %id, "Agent deleted");
    Ok(Json(json!({"deleted": true})))
}

pub async fn run_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), NightshiftError> {
    let submission = state.scheduler.trigger_now(&id).await?;
    let status = submission.as_str();
    Ok(match submission {
        Submission::Started(handle) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": status, "runId": handle.run_id})),
        ),
        Submission::AlreadyRunning { run_id } => (
            StatusCode::CONFLICT,
            Json(json!({"status": status, "runId": run_id, "error": "a run is already in flight"})),
        ),
        Submission::GateClosed => (
            StatusCode::PRECONDITION_FAILED,
            Json(json!({"status": status, "error": "conditions not met, see agent logs"})),
        ),
        Submission::Paused => (
            StatusCode::CONFLICT,
            Json(json!({"status": status, "error": "agent is paused"})),
        ),
    })
}

pub async fn cancel_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), NightshiftError> {
    load(&state, &id)?;
    if state.scheduler.cancel(&id) {
        Ok((StatusCode::ACCEPTED, Json(json!({"cancelled": true}))))
    } else {
        Ok((StatusCode::CONFLICT, Json(json!({"cancelled": false, "error": "no run in flight"}))))
    }
}

async fn set_status(state: &AppState, id: &str, status: AgentStatus) -> Result<Json<AgentResponse>, NightshiftError> {
    let patch = AgentPatch { status: Some(status), ..Default::default() };
    let agent = state.db.update_agent(id, patch)?;
    info!(agent_id = %id, status = %status, "Agent status changed");
    Ok(Json(register(state, agent)?))
}

/// Stops future runs. A run in flight finishes normally.
pub async fn pause_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentResponse>, NightshiftError> {
    set_status(&state, &id, AgentStatus::Paused).await
}

pub async fn resume_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentResponse>, NightshiftError> {
    let agent = load(&state, &id)?;
    if !agent.is_paused() {
        return Err(NightshiftError::Validation(format!("agent '{}' is not paused", id)));
    }
    let status = requested_status(&state, &id, AgentStatus::Idle)?;
    set_status(&state, &id, status).await
}
