//! Apply executor behaviour on a real (temporary) filesystem: transactional
//! rollback, continue-on-error tokens, locking, stale detection, dry runs.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use namegnome_core::apply::{ApplyExecutor, LOCK_FILE_NAME, RootLock};
use namegnome_core::cache::CacheStore;
use namegnome_core::plan::{DraftItem, assemble};
use namegnome_core::scanner::scan_root;
use namegnome_core::CoreError;
use namegnome_model::{
    ApplyMode, ApplyOptions, CollisionStrategy, EpisodeSpan, ItemStatus, MediaType, PlanOrigin,
    PlanReview, ScanSnapshot,
};

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"content").unwrap();
}

fn listing(root: &Path) -> BTreeSet<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Build a review whose items rename each scanned file to the given
/// destination (relative to the root).
fn review_for(snapshot: &ScanSnapshot, destinations: &[(usize, &str)]) -> PlanReview {
    let drafts: Vec<DraftItem> = destinations
        .iter()
        .map(|(index, dst)| {
            let file = &snapshot.files[*index];
            let dst_path = PathBuf::from(dst);
            DraftItem {
                src_path: file.path.clone(),
                segment: None,
                origin: PlanOrigin::Deterministic,
                confidence: 1.0,
                episode: Some(EpisodeSpan {
                    season: 1,
                    episodes: vec![*index as u32 + 1],
                    titles: vec![dst_path
                        .file_stem()
                        .unwrap()
                        .to_string_lossy()
                        .to_string()],
                }),
                movie: None,
                track: None,
                show_title: Some("Show".to_string()),
                show_year: Some(2020),
                sources: Vec::new(),
                warnings: Vec::new(),
                anthology: false,
                disambiguation: None,
                alternatives: Vec::new(),
                explain: None,
                no_op: false,
            }
        })
        .collect();
    let mut review = assemble(snapshot, drafts, Vec::new()).unwrap();
    // Pin the destinations directly so tests control collisions precisely.
    for (item, (_, dst)) in review.items.iter_mut().zip(destinations.iter()) {
        item.dst.path = PathBuf::from(dst);
    }
    review
}

async fn executor() -> (ApplyExecutor, Arc<CacheStore>) {
    let store = Arc::new(CacheStore::open_in_memory().await.unwrap());
    (ApplyExecutor::new(Arc::clone(&store)), store)
}

const LOCK_TIMEOUT: Duration = Duration::from_millis(300);

#[tokio::test]
async fn renames_into_new_directories() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("a.mkv"));
    let snapshot = scan_root(root.path(), MediaType::Tv).unwrap();
    // The bare file has no episode marker so scanning skips it; seed a
    // markered file instead.
    assert!(snapshot.files.is_empty());

    touch(&root.path().join("Show-S01E01-Pilot.mkv"));
    let snapshot = scan_root(root.path(), MediaType::Tv).unwrap();
    assert_eq!(snapshot.files.len(), 1);

    let review = review_for(&snapshot, &[(0, "Show (2020)/Season 01/renamed.mkv")]);
    let (executor, _store) = executor().await;
    let report = executor
        .apply(
            &review,
            root.path(),
            Some(&snapshot),
            &ApplyOptions::default(),
            LOCK_TIMEOUT,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.summary.renamed, 1);
    assert!(root.path().join("Show (2020)/Season 01/renamed.mkv").exists());
    assert!(!root.path().join("Show-S01E01-Pilot.mkv").exists());
    // The lock is gone after a clean exit.
    assert!(!root.path().join(LOCK_FILE_NAME).exists());
}

#[tokio::test]
async fn transactional_failure_reverts_committed_renames() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("Show-S01E01-One.mkv"));
    touch(&root.path().join("Show-S01E02-Two.mkv"));
    // A plain file where the second item wants a directory forces a
    // mkdir failure mid-run.
    touch(&root.path().join("blocked"));

    let snapshot = scan_root(root.path(), MediaType::Tv).unwrap();
    let before = listing(root.path());

    let review = review_for(
        &snapshot,
        &[(0, "ok/one.mkv"), (1, "blocked/two.mkv")],
    );
    let (executor, _store) = executor().await;
    let report = executor
        .apply(
            &review,
            root.path(),
            Some(&snapshot),
            &ApplyOptions {
                mode: ApplyMode::Transactional,
                collision: CollisionStrategy::Skip,
            },
            LOCK_TIMEOUT,
            None,
        )
        .await
        .unwrap();

    assert!(report.rolled_back);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.rolled_back, 1);

    // P5: the filesystem listing matches the pre-apply state exactly.
    assert_eq!(listing(root.path()), before);
}

#[tokio::test]
async fn continue_on_error_mints_rollback_token() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("Show-S01E01-One.mkv"));
    touch(&root.path().join("Show-S01E02-Two.mkv"));
    touch(&root.path().join("blocked"));

    let snapshot = scan_root(root.path(), MediaType::Tv).unwrap();
    let review = review_for(
        &snapshot,
        &[(0, "ok/one.mkv"), (1, "blocked/two.mkv")],
    );
    let (executor, _store) = executor().await;
    let report = executor
        .apply(
            &review,
            root.path(),
            Some(&snapshot),
            &ApplyOptions {
                mode: ApplyMode::ContinueOnError,
                collision: CollisionStrategy::Skip,
            },
            LOCK_TIMEOUT,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.summary.renamed, 1);
    assert_eq!(report.summary.failed, 1);
    let token = report.rollback_token.expect("token for committed subset");
    assert!(token.starts_with("rbk_"));
    assert!(root.path().join("ok/one.mkv").exists());

    // Undo on demand restores the committed rename.
    let outcomes = executor.rollback_by_token(&token).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, ItemStatus::RolledBack);
    assert!(root.path().join("Show-S01E01-One.mkv").exists());
    assert!(!root.path().join("ok/one.mkv").exists());
}

#[tokio::test]
async fn dry_run_never_mutates() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("Show-S01E01-One.mkv"));
    let snapshot = scan_root(root.path(), MediaType::Tv).unwrap();
    let before = listing(root.path());

    let review = review_for(&snapshot, &[(0, "ok/one.mkv")]);
    let (executor, _store) = executor().await;
    let report = executor
        .apply(
            &review,
            root.path(),
            Some(&snapshot),
            &ApplyOptions {
                mode: ApplyMode::DryRun,
                collision: CollisionStrategy::Skip,
            },
            LOCK_TIMEOUT,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].status, ItemStatus::WouldRename);
    assert_eq!(report.summary.renamed, 1);
    assert_eq!(listing(root.path()), before);
}

#[tokio::test]
async fn modified_source_is_skipped_as_stale() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("Show-S01E01-One.mkv"));
    let snapshot = scan_root(root.path(), MediaType::Tv).unwrap();

    // Fake a post-scan modification by bumping the recorded mtime.
    let mut stale_snapshot = snapshot.clone();
    stale_snapshot.files[0].modified =
        stale_snapshot.files[0].modified - chrono::Duration::seconds(1000);

    let review = review_for(&stale_snapshot, &[(0, "ok/one.mkv")]);
    let (executor, _store) = executor().await;
    let report = executor
        .apply(
            &review,
            root.path(),
            Some(&stale_snapshot),
            &ApplyOptions::default(),
            LOCK_TIMEOUT,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].status, ItemStatus::Stale);
    assert_eq!(report.summary.stale, 1);
    assert!(root.path().join("Show-S01E01-One.mkv").exists());
}

#[tokio::test]
async fn collision_strategies_skip_and_backup() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("Show-S01E01-One.mkv"));
    touch(&root.path().join("taken.mkv"));
    let snapshot = scan_root(root.path(), MediaType::Tv).unwrap();
    let source_index = snapshot
        .files
        .iter()
        .position(|f| f.path.file_name().unwrap() == "Show-S01E01-One.mkv")
        .unwrap();

    let review = review_for(&snapshot, &[(source_index, "taken.mkv")]);
    let (executor, _store) = executor().await;

    let report = executor
        .apply(
            &review,
            root.path(),
            Some(&snapshot),
            &ApplyOptions {
                mode: ApplyMode::Transactional,
                collision: CollisionStrategy::Skip,
            },
            LOCK_TIMEOUT,
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.outcomes[0].status, ItemStatus::SkippedCollision);

    let report = executor
        .apply(
            &review,
            root.path(),
            Some(&snapshot),
            &ApplyOptions {
                mode: ApplyMode::Transactional,
                collision: CollisionStrategy::Backup,
            },
            LOCK_TIMEOUT,
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.outcomes[0].status, ItemStatus::Renamed);
    assert!(root.path().join("taken.mkv.bak").exists());
}

#[tokio::test]
async fn second_apply_on_same_root_sees_locked() {
    let root = tempfile::tempdir().unwrap();
    touch(&root.path().join("Show-S01E01-One.mkv"));
    let snapshot = scan_root(root.path(), MediaType::Tv).unwrap();
    let before = listing(root.path());

    let (executor, store) = executor().await;
    // First apply's lock, held across the second attempt.
    let lock = RootLock::acquire(
        Arc::clone(&store),
        root.path(),
        "job-a",
        LOCK_TIMEOUT,
    )
    .await
    .unwrap();

    let review = review_for(&snapshot, &[(0, "ok/one.mkv")]);
    let err = executor
        .apply(
            &review,
            root.path(),
            Some(&snapshot),
            &ApplyOptions::default(),
            LOCK_TIMEOUT,
            None,
        )
        .await
        .unwrap_err();
    let CoreError::Locked { owner, .. } = err else {
        panic!("expected Locked, got {err:?}");
    };
    assert_eq!(owner, "job-a");

    // P7: the loser mutated nothing (minus the winner's lock file).
    let mut after = listing(root.path());
    after.remove(&root.path().join(LOCK_FILE_NAME));
    assert_eq!(after, before);

    lock.release().await.unwrap();
    // With the lock gone the apply goes through.
    let report = executor
        .apply(
            &review,
            root.path(),
            Some(&snapshot),
            &ApplyOptions::default(),
            LOCK_TIMEOUT,
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.summary.renamed, 1);
}
