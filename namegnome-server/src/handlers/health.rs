use axum::{Json, extract::State};
use serde_json::json;

use crate::state::AppState;

pub async fn healthz_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let entities = state.store.entity_count().await.ok();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cache": {
            "reachable": entities.is_some(),
            "entities": entities,
        },
    }))
}
