use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use namegnome_core::plan::to_canonical_json;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DisambiguateRequest {
    pub token: String,
    pub choice_id: String,
}

/// Resolve a pending disambiguation and resume planning from the pinned
/// entity. The reply is the fresh plan.
pub async fn disambiguate_handler(
    State(state): State<AppState>,
    Json(request): Json<DisambiguateRequest>,
) -> AppResult<Response> {
    if state
        .pipeline
        .ledger()
        .get(&request.token)
        .await?
        .is_none()
    {
        return Err(AppError::not_found(format!(
            "unknown disambiguation token: {}",
            request.token
        )));
    }

    let review = state
        .pipeline
        .resolve_and_replan(&request.token, &request.choice_id)
        .await?;
    let canonical = to_canonical_json(&review)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        canonical,
    )
        .into_response())
}
