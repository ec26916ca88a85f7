//! Router-level tests via `tower::ServiceExt::oneshot` — no sockets.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use namegnome_config::Config;
use namegnome_server::routes::create_router;
use namegnome_server::state::AppState;

async fn test_router() -> axum::Router {
    let mut config = Config::default();
    config.llm.enabled = false;
    let state = AppState::build_in_memory(config).await.unwrap();
    create_router(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_reports_cache_state() {
    let router = test_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["cache"]["reachable"], true);
}

#[tokio::test]
async fn scan_rejects_missing_root() {
    let router = test_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scan")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "root": "/definitely/not/a/dir",
                        "media_type": "tv"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn plan_requires_scan_id_or_root() {
    let router = test_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/plan")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn scan_then_offline_plan_round_trip() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("Show-S01E01-Pilot.mkv"), b"x").unwrap();

    let router = test_router().await;
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scan")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "root": root.path(),
                        "media_type": "tv"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let scan = body_json(response).await;
    assert_eq!(scan["file_count"], 1);
    let scan_id = scan["scan_id"].as_str().unwrap().to_string();

    // Offline plan: the provider miss degrades to a needs_review item.
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/plan")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "scan_id": scan_id,
                        "offline": true
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let plan = body_json(response).await;
    assert_eq!(plan["schema_version"], "1.0");
    assert_eq!(plan["summary"]["total_items"], 1);
    assert_eq!(plan["summary"]["warnings"]["needs_review"], 1);
}

#[tokio::test]
async fn unknown_job_is_404() {
    let router = test_router().await;
    for uri in [
        "/jobs/00000000-0000-0000-0000-000000000000/status",
        "/jobs/00000000-0000-0000-0000-000000000000/events",
    ] {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn unknown_disambiguation_token_is_404() {
    let router = test_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/disambiguate")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "token": "dsk_nope",
                        "choice_id": "1"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn async_plan_returns_job_id_and_status_resolves() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("Show-S01E01-Pilot.mkv"), b"x").unwrap();

    let router = test_router().await;
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/plan")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "root": root.path(),
                        "media_type": "tv",
                        "offline": true,
                        "async": true
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = body_json(response).await;
    let job_id = accepted["job_id"].as_str().unwrap().to_string();

    // Poll until the buffered result lands.
    for _ in 0..50 {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{job_id}/status"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        if status["status"]["state"] == "completed" {
            assert_eq!(status["result"]["schema_version"], "1.0");
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("async plan never completed");
}
