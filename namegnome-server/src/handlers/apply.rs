use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use namegnome_model::{ApplyMode, ApplyOptions, CollisionStrategy};

use crate::errors::AppResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub plan_id: Uuid,
    #[serde(default)]
    pub mode: ApplyMode,
    #[serde(default)]
    pub collision: CollisionStrategy,
}

/// Execute an approved plan. Full success is 200; partial outcomes (stale
/// skips, failures, rollbacks) are 207 Multi-Status with per-item results.
pub async fn apply_handler(
    State(state): State<AppState>,
    Json(request): Json<ApplyRequest>,
) -> AppResult<Response> {
    let options = ApplyOptions {
        mode: request.mode,
        collision: request.collision,
    };
    let report = state
        .pipeline
        .apply_by_id(request.plan_id, &options, None)
        .await?;

    info!(
        plan_id = %request.plan_id,
        report_id = %report.report_id,
        renamed = report.summary.renamed,
        failed = report.summary.failed,
        "apply served"
    );

    let status = if report.is_partial() {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)).into_response())
}
