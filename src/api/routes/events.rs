use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::debug;

use crate::api::models::EventRequest;
use crate::api::AppState;
use crate::errors::NightshiftError;
use crate::facts::{FactSnapshot, FactSource};

/// Queue an event for the next scheduler cycle.
pub async fn post_event(
    State(state): State<AppState>,
    Json(req): Json<EventRequest>,
) -> Result<(StatusCode, Json<Value>), NightshiftError> {
    let event = req.event.trim().to_string();
    if event.is_empty() {
        return Err(NightshiftError::Validation("event name must not be empty".into()));
    }
    debug!(event = %event, "Event received");
    state.facts.push_event(event.clone()).await;
    Ok((StatusCode::ACCEPTED, Json(json!({"accepted": event}))))
}

/// Replace the API-supplied facts.
pub async fn put_facts(
    State(state): State<AppState>,
    Json(facts): Json<FactSnapshot>,
) -> Json<Value> {
    let count = facts.len();
    state.facts.replace_facts(facts).await;
    Json(json!({"facts": count}))
}

pub async fn get_facts(State(state): State<AppState>) -> Result<Json<FactSnapshot>, NightshiftError> {
    Ok(Json(state.facts.current_facts().await?))
}
