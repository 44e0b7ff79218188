pub mod agents;
pub mod events;
pub mod runs;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::api::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "nightshift",
        "version": env!("CARGO_PKG_VERSION"),
        "agents": state.scheduler.registry().len(),
        "activeRuns": state.scheduler.active_runs(),
    }))
}
