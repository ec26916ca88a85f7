use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{
    apply::apply_handler, disambiguate::disambiguate_handler, health::healthz_handler,
    jobs::{job_events_handler, job_status_handler}, plan::plan_handler, scan::scan_handler,
};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/scan", post(scan_handler))
        .route("/plan", post(plan_handler))
        .route("/disambiguate", post(disambiguate_handler))
        .route("/apply", post(apply_handler))
        .route("/jobs/{id}/events", get(job_events_handler))
        .route("/jobs/{id}/status", get(job_status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
