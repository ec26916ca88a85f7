use std::path::PathBuf;

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use namegnome_core::PlanOptions;
use namegnome_core::plan::to_canonical_json;
use namegnome_model::{JobKind, MediaType, ProviderKind, ScanRequest, ScanSnapshot};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub root: Option<PathBuf>,
    pub scan_id: Option<Uuid>,
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub anthology: bool,
    #[serde(default)]
    pub offline: bool,
    pub provider: Option<ProviderKind>,
    #[serde(default = "default_true")]
    pub llm: bool,
    /// When set, return `202 {job_id}` and stream progress over SSE.
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

impl PlanRequest {
    fn options(&self) -> PlanOptions {
        PlanOptions {
            anthology: self.anthology,
            offline: self.offline,
            provider: self.provider,
            use_llm: self.llm,
        }
    }
}

/// The canonical serialization is the response body, byte for byte.
fn canonical_response(json: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        json,
    )
        .into_response()
}

async fn obtain_snapshot(state: &AppState, request: &PlanRequest) -> AppResult<ScanSnapshot> {
    if let Some(scan_id) = request.scan_id {
        return state
            .pipeline
            .load_snapshot(scan_id)
            .await?
            .ok_or_else(|| AppError::validation(format!("unknown or expired scan id {scan_id}")));
    }
    let (Some(root), Some(media_type)) = (request.root.clone(), request.media_type) else {
        return Err(AppError::validation(
            "either scan_id or root + media_type is required",
        ));
    };
    Ok(state
        .pipeline
        .scan(
            &ScanRequest {
                root,
                media_type,
                compute_hashes: false,
            },
            None,
        )
        .await?)
}

pub async fn plan_handler(
    State(state): State<AppState>,
    Json(request): Json<PlanRequest>,
) -> AppResult<Response> {
    let snapshot = obtain_snapshot(&state, &request).await?;
    let options = request.options();

    if request.run_async {
        let job = state.jobs.create(JobKind::Plan);
        let job_id = job.job_id;
        let pipeline = state.pipeline.clone();
        tokio::spawn(async move {
            match pipeline.plan(&snapshot, &options, Some(&job)).await {
                Ok(review) => match serde_json::to_value(&review) {
                    Ok(value) => job.complete(value),
                    Err(err) => job.fail(err.to_string()),
                },
                Err(err) => job.fail(err.to_string()),
            }
        });
        return Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))).into_response());
    }

    let review = state.pipeline.plan(&snapshot, &options, None).await?;
    let canonical = to_canonical_json(&review).map_err(AppError::from)?;
    Ok(canonical_response(canonical))
}
