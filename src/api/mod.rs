pub mod errors;
pub mod models;
pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::facts::StaticFactSource;
use crate::scheduler::Scheduler;
use crate::store::Database;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub scheduler: Arc<Scheduler>,
    /// Facts and events pushed through the API.
    pub facts: Arc<StaticFactSource>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health_check))
        .route("/api/agents", get(routes::agents::list_agents).post(routes::agents::create_agent))
        .route(
            "/api/agents/{id}",
            get(routes::agents::get_agent)
                .patch(routes::agents::update_agent)
                .delete(routes::agents::delete_agent),
        )
        .route("/api/agents/{id}/run", post(routes::agents::run_agent))
        .route("/api/agents/{id}/cancel", post(routes::agents::cancel_agent))
        .route("/api/agents/{id}/pause", post(routes::agents::pause_agent))
        .route("/api/agents/{id}/resume", post(routes::agents::resume_agent))
        .route("/api/agents/{id}/runs", get(routes::runs::list_runs))
        .route("/api/runs/{id}", get(routes::runs::get_run))
        .route("/api/runs/{id}/annotations", post(routes::runs::annotate_run))
        .route("/api/events", post(routes::events::post_event))
        .route("/api/facts", put(routes::events::put_facts).get(routes::events::get_facts))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
