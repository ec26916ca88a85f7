//! LLM assist behaviour at pipeline level: the model only runs on residual
//! ambiguity, clearly better proposals win the merge, and non-conforming
//! output degrades to the deterministic result.

mod support;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use namegnome_core::PlanOptions;
use namegnome_core::anthology::llm::{GroupingModel, LlmError};
use namegnome_model::{MediaType, PlanOrigin, ScanRequest, WarningCode};

use support::MockProvider;

struct StubModel {
    reply: String,
    calls: AtomicUsize,
}

impl StubModel {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GroupingModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"x").unwrap();
}

fn provider() -> MockProvider {
    MockProvider::tvdb().with_series(
        "1",
        "Show",
        Some(2020),
        &[(1, 1, "Alpha"), (1, 2, "Bravo")],
    )
}

/// Two segments declaring the same episode with junk titles: the
/// deterministic pass cannot untangle them.
const AMBIGUOUS_FILE: &str = "Show-S01E01-Foo-S01E01-Bar.mp4";

async fn plan_with_model(
    model: Arc<StubModel>,
) -> (namegnome_model::PlanReview, Arc<StubModel>) {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join(AMBIGUOUS_FILE));

    let pipeline = support::pipeline_with_tv(provider())
        .await
        .with_model(model.clone());
    let snapshot = pipeline
        .scan(
            &ScanRequest {
                root: root.path().to_path_buf(),
                media_type: MediaType::Tv,
                compute_hashes: false,
            },
            None,
        )
        .await
        .unwrap();
    let options = PlanOptions {
        anthology: true,
        use_llm: true,
        ..PlanOptions::default()
    };
    let review = pipeline.plan(&snapshot, &options, None).await.unwrap();
    (review, model)
}

#[tokio::test]
async fn confident_assist_proposal_wins_the_merge() {
    let model = StubModel::new(
        r#"{"groups":[
            {"season":1,"episodes":[1],"titles":["Alpha"],"confidence":0.95},
            {"season":1,"episodes":[2],"titles":["Bravo"],"confidence":0.95}
        ]}"#,
    );
    let (review, model) = plan_with_model(model).await;

    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(review.items.len(), 2);
    for item in &review.items {
        assert_eq!(item.origin, PlanOrigin::Llm);
        // The deterministic loser is preserved for review.
        assert_eq!(item.alternatives.len(), 1);
        assert_eq!(item.alternatives[0].origin, PlanOrigin::Deterministic);
    }
    assert_eq!(review.summary.by_origin["llm"], 2);
}

#[tokio::test]
async fn malformed_assist_output_degrades_to_deterministic() {
    let model = StubModel::new("sorry, I grouped them as E1+E2!");
    let (review, model) = plan_with_model(model).await;

    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert!(!review.items.is_empty());
    for item in &review.items {
        assert_eq!(item.origin, PlanOrigin::Deterministic);
        assert!(item.warnings.contains(&WarningCode::LlmUnavailable));
    }
}

#[tokio::test]
async fn assist_is_not_consulted_when_grouping_is_clean() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("Show-S01E01-Alpha.mp4"));

    let model = StubModel::new(r#"{"groups":[]}"#);
    let pipeline = support::pipeline_with_tv(provider())
        .await
        .with_model(model.clone());
    let snapshot = pipeline
        .scan(
            &ScanRequest {
                root: root.path().to_path_buf(),
                media_type: MediaType::Tv,
                compute_hashes: false,
            },
            None,
        )
        .await
        .unwrap();
    let options = PlanOptions {
        anthology: true,
        use_llm: true,
        ..PlanOptions::default()
    };
    let review = pipeline.plan(&snapshot, &options, None).await.unwrap();

    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    assert_eq!(review.items[0].origin, PlanOrigin::Deterministic);
    assert!((review.items[0].confidence - 1.0).abs() < 1e-9);
}
