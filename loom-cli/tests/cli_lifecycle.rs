use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use loom_core::{store, Ledger, StatusDocument};
use predicates::str::contains;
use tempfile::TempDir;

fn loom_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("loom"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn init_project(dir: &Path) {
    loom_cmd()
        .args(["init"])
        .arg(dir)
        .args(["--name", "demo"])
        .assert()
        .success()
        .stdout(contains("initialised 'demo'"));
}

fn loom_in(dir: &Path, args: &[&str]) -> assert_cmd::assert::Assert {
    loom_cmd().args(args).arg("-C").arg(dir).assert()
}

#[test]
fn init_scaffolds_and_validate_is_clean() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("demo");
    init_project(&dir);

    assert!(dir.join(".loom/status.xml").is_file());
    assert!(dir.join("docs/ARCHITECTURE.md").is_file());
    assert!(dir.join(".claude/settings.json").is_file());

    loom_cmd()
        .arg("validate")
        .arg(&dir)
        .assert()
        .success()
        .stdout(contains("nothing to fix"));
}

#[test]
fn init_twice_fails_with_exit_one() {
    let tmp = TempDir::new().unwrap();
    init_project(tmp.path());
    loom_cmd()
        .arg("init")
        .arg(tmp.path())
        .assert()
        .code(1)
        .stderr(contains("already initialised"));
}

#[test]
fn update_without_yes_exits_two_and_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    init_project(tmp.path());
    fs::remove_file(tmp.path().join("docs/PRD.md")).unwrap();

    loom_cmd()
        .arg("validate")
        .arg(tmp.path())
        .assert()
        .code(2)
        .stdout(contains("docs/PRD.md"));

    loom_cmd()
        .arg("update")
        .arg(tmp.path())
        .assert()
        .code(2)
        .stdout(contains("--yes"));
    assert!(!tmp.path().join("docs/PRD.md").exists());

    loom_cmd()
        .arg("update")
        .arg(tmp.path())
        .arg("--yes")
        .assert()
        .success()
        .stdout(contains("converged"));
    assert!(tmp.path().join("docs/PRD.md").is_file());
}

#[test]
fn invalid_settings_need_allow_destructive() {
    let tmp = TempDir::new().unwrap();
    init_project(tmp.path());
    fs::write(tmp.path().join(".claude/settings.json"), "{ not json").unwrap();

    loom_cmd()
        .arg("update")
        .arg(tmp.path())
        .arg("--yes")
        .assert()
        .code(3);
    assert_eq!(
        fs::read_to_string(tmp.path().join(".claude/settings.json")).unwrap(),
        "{ not json"
    );

    loom_cmd()
        .arg("update")
        .arg(tmp.path())
        .args(["--yes", "--allow-destructive"])
        .assert()
        .success();
    let settings = fs::read_to_string(tmp.path().join(".claude/settings.json")).unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&settings).is_ok());
}

#[test]
fn story_lifecycle_through_the_cli() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    init_project(dir);

    loom_in(dir, &["feature", "create", "payments"]).success();
    loom_in(dir, &["feature", "activate", "payments"]).success();
    loom_in(dir, &["epic", "create", "payments", "epic-1"]).success();
    loom_in(
        dir,
        &["story", "create", "payments/epic-1/story-1", "-t", "api", "-t", "ui", "-t", "docs"],
    )
    .success()
    .stdout(contains("3 task(s)"));
    assert!(dir
        .join("features/payments/epics/epic-1/stories/story-1.md")
        .is_file());

    loom_in(dir, &["story", "start", "payments/epic-1/story-1"]).success();
    loom_in(dir, &["story", "close", "payments/epic-1/story-1"])
        .code(1)
        .stderr(contains("open task"));

    for task in ["1", "2", "3"] {
        loom_in(
            dir,
            &["task", "complete", "payments/epic-1/story-1", task, "--commit", "abc123"],
        )
        .success();
    }
    loom_in(dir, &["review", "inject", "payments/epic-1/story-1", "missing test"])
        .success()
        .stdout(contains("r1"));
    loom_in(dir, &["task", "complete", "payments/epic-1/story-1", "r1"])
        .success()
        .stdout(contains("waiting-for-review"));
    loom_in(dir, &["story", "close", "payments/epic-1/story-1"]).success();

    let out = loom_cmd()
        .arg("status")
        .arg(dir)
        .arg("--json")
        .assert()
        .success();
    let json: serde_json::Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    let story = &json["ledger"]["features"][0]["epics"][0]["stories"][0];
    assert_eq!(story["status"], "done");
    assert_eq!(json["ledger"]["features"][0]["is_active"], true);

    loom_cmd().arg("validate").arg(dir).assert().success();
}

#[test]
fn invalid_names_are_rejected_with_exit_one() {
    let tmp = TempDir::new().unwrap();
    init_project(tmp.path());
    loom_in(tmp.path(), &["feature", "create", "Not Valid"]).code(1);
    loom_in(tmp.path(), &["epic", "create", "missing", "epic-1"])
        .code(1)
        .stderr(contains("not found"));
}

#[test]
fn migrate_flat_project_then_update() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let mut doc = StatusDocument::from_ledger(Ledger::new("legacy"));
    store::save(&mut doc, &dir.join("status.xml")).unwrap();
    fs::write(dir.join("PRD.md"), "# Product Requirements\n").unwrap();

    loom_cmd()
        .arg("migrate")
        .arg(dir)
        .args(["--from", "flat", "--to", "standard", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("[dry-run]"));
    assert!(dir.join("status.xml").exists());

    loom_cmd()
        .arg("migrate")
        .arg(dir)
        .args(["--from", "flat", "--to", "standard"])
        .assert()
        .success();
    assert!(dir.join(".loom/status.xml").is_file());
    assert!(dir.join("docs/PRD.md").is_file());

    loom_cmd()
        .arg("update")
        .arg(dir)
        .arg("--yes")
        .assert()
        .success();
}

#[test]
fn restore_lists_and_recovers_backups() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    init_project(dir);
    loom_in(dir, &["feature", "create", "payments"]).success();

    loom_cmd()
        .arg("restore")
        .arg(dir)
        .arg("--list")
        .assert()
        .success()
        .stdout(contains("status.xml."));

    fs::write(dir.join(".loom/status.xml"), "<loom-status><broken>").unwrap();
    loom_cmd().arg("status").arg(dir).assert().code(1);

    loom_cmd()
        .arg("restore")
        .arg(dir)
        .assert()
        .success()
        .stdout(contains("restored 'demo'"));
    loom_cmd().arg("status").arg(dir).assert().success();
}

#[test]
fn unknown_arguments_exit_one() {
    loom_cmd().args(["update", "--bogus"]).assert().code(1);
    loom_cmd().arg("--help").assert().success();
}
