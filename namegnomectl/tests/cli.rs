use assert_cmd::Command;
use predicates::prelude::*;

fn cmd() -> Command {
    Command::cargo_bin("namegnomectl").unwrap()
}

#[test]
fn help_lists_subcommands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("resolve"));
}

#[test]
fn unknown_media_type_is_a_usage_error() {
    let root = tempfile::tempdir().unwrap();
    cmd()
        .args(["scan", "--root"])
        .arg(root.path())
        .args(["--media-type", "vhs"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unknown media type"));
}

#[test]
fn scan_of_empty_root_succeeds() {
    let root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    cmd()
        .env("NAMEGNOME_CACHE_PATH", cache.path().join("ng.db"))
        .args(["scan", "--root"])
        .arg(root.path())
        .args(["--media-type", "tv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 files"));
}

#[test]
fn scan_emits_json_when_asked() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("Show-S01E01-Pilot.mkv"), b"x").unwrap();
    let cache = tempfile::tempdir().unwrap();
    cmd()
        .env("NAMEGNOME_CACHE_PATH", cache.path().join("ng.db"))
        .args(["scan", "--root"])
        .arg(root.path())
        .args(["--media-type", "tv", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"file_count\": 1"));
}

#[test]
fn nonexistent_root_exits_with_validation_code() {
    let cache = tempfile::tempdir().unwrap();
    cmd()
        .env("NAMEGNOME_CACHE_PATH", cache.path().join("ng.db"))
        .args([
            "scan",
            "--root",
            "/definitely/not/a/dir",
            "--media-type",
            "tv",
        ])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn offline_plan_generate_prints_summary() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("Show-S01E01-Pilot.mkv"), b"x").unwrap();
    let cache = tempfile::tempdir().unwrap();
    cmd()
        .env("NAMEGNOME_CACHE_PATH", cache.path().join("ng.db"))
        .args(["plan", "generate", "--root"])
        .arg(root.path())
        .args(["--media-type", "tv", "--offline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("plan "))
        .stdout(predicate::str::contains("warning needs_review: 1"));
}
