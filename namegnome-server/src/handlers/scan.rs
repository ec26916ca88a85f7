use axum::{Json, extract::State};
use tracing::info;

use namegnome_model::{ScanRequest, ScanResult};

use crate::errors::AppResult;
use crate::state::AppState;

pub async fn scan_handler(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> AppResult<Json<ScanResult>> {
    let snapshot = state.pipeline.scan(&request, None).await?;
    info!(scan_id = %snapshot.scan_id, files = snapshot.files.len(), "scan served");
    Ok(Json(ScanResult::from(&snapshot)))
}
