use serde::{Deserialize, Serialize};

use crate::models::Agent;

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct AnnotateRequest {
    pub note: String,
}

#[derive(Deserialize)]
pub struct EventRequest {
    pub event: String,
}

/// An agent plus its live run state.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    #[serde(flatten)]
    pub agent: Agent,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_run_id: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
