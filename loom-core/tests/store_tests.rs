//! State store integration tests: load errors, atomic-write safety, backups
//! and restore.

use std::fs;
use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use loom_core::{
    ledger::Ledger,
    store::{self, StateStore},
    types::{StoryRef, TaskId},
    Model, StatusDocument, StoreError,
};
use predicates::prelude::predicate;

fn status_path(dir: &Path) -> PathBuf {
    dir.join(".loom").join("status.xml")
}

fn seeded(dir: &Path) -> PathBuf {
    let path = status_path(dir);
    let mut model = Model::new(Ledger::new("demo"));
    let r = StoryRef::parse("payments/epic-1/story-1").unwrap();
    model.create_feature(&r.feature).unwrap();
    model.create_epic(&r.feature, &r.epic).unwrap();
    model
        .create_story(&r, &["one".into(), "two".into()])
        .unwrap();
    model.activate_feature(&r.feature).unwrap();
    model.start_story(&r).unwrap();
    let mut doc = StatusDocument::from_ledger(model.into_ledger());
    store::save(&mut doc, &path).expect("seed save");
    path
}

// ---------------------------------------------------------------------------
// 1. Load errors
// ---------------------------------------------------------------------------

#[test]
fn load_missing_returns_not_found() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let err = store::load(&status_path(dir.path())).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("status.xml"));
}

#[test]
fn load_garbage_bytes_is_corrupted_not_panic() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = seeded(dir.path());
    let mut bytes = fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes.splice(mid..mid, [0x00, 0xff, 0xfe, b'<', b'&']);
    fs::write(&path, bytes).unwrap();

    let err = store::load(&path).unwrap_err();
    assert!(matches!(err, StoreError::Corrupted { .. }), "got: {err}");
}

#[test]
fn load_deeply_nested_document_is_corrupted() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = status_path(dir.path());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "<loom-status>".repeat(100_000)).unwrap();

    let err = store::load(&path).unwrap_err();
    assert!(matches!(err, StoreError::Corrupted { .. }), "got: {err}");
    assert!(err.to_string().contains("nested deeper"), "got: {err}");
}

#[test]
fn load_truncated_document_is_corrupted() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = seeded(dir.path());
    let text = fs::read_to_string(&path).unwrap();
    fs::write(&path, &text[..text.len() / 3]).unwrap();

    let err = store::load(&path).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("corrupted"), "{msg}");
    assert!(msg.contains("line"), "parse position is reported: {msg}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_cleans_up_tmp_file() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = seeded(dir.path());
    assert!(!store::tmp_path(&path).exists());
    dir.child(".loom/status.xml")
        .assert(predicate::str::contains("<loom-status version=\"1\">"));
}

#[test]
fn failed_verification_leaves_original_untouched() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = seeded(dir.path());
    let before = fs::read(&path).unwrap();

    let mut doc = store::load(&path).unwrap();
    // U+0001 cannot appear in an XML document, so the written copy will not
    // re-parse.
    doc.ledger_mut().features[0].epics[0].stories[0].tasks[0].description = "bad\u{1}".into();
    let err = store::save(&mut doc, &path).unwrap_err();

    assert!(matches!(err, StoreError::Verification { .. }), "got: {err}");
    assert_eq!(fs::read(&path).unwrap(), before);
    assert!(!store::tmp_path(&path).exists());
}

#[test]
fn reload_and_save_changes_only_timestamp() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = seeded(dir.path());
    let before = fs::read_to_string(&path).unwrap();

    let mut doc = store::load(&path).unwrap();
    store::save(&mut doc, &path).unwrap();
    let after = fs::read_to_string(&path).unwrap();

    let strip = |s: &str| -> Vec<String> {
        s.lines()
            .filter(|l| !l.contains("<last-modified>"))
            .map(str::to_owned)
            .collect()
    };
    assert_eq!(strip(&before), strip(&after));
    assert_eq!(before.len(), after.len());
}

#[test]
fn single_task_edit_is_a_minimal_diff() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = seeded(dir.path());
    let before = fs::read_to_string(&path).unwrap();

    let doc = store::load(&path).unwrap();
    let mut model = Model::new(doc.ledger().clone());
    let r = StoryRef::parse("payments/epic-1/story-1").unwrap();
    model.advance_task(&r, &TaskId::new("1").unwrap(), None).unwrap();
    let mut doc = doc;
    doc.set_ledger(model.into_ledger());
    store::save(&mut doc, &path).unwrap();
    let after = fs::read_to_string(&path).unwrap();

    let changed: Vec<(&str, &str)> = before
        .lines()
        .zip(after.lines())
        .filter(|(a, b)| a != b)
        .collect();
    let touched: Vec<&str> = changed
        .iter()
        .map(|(_, b)| b.trim_start().split(|c: char| c == '>' || c == ' ').next().unwrap_or(""))
        .collect();
    for tag in &touched {
        assert!(
            ["<last-modified", "<story", "<task"].contains(tag),
            "unexpected change in {tag}: {changed:?}"
        );
    }
}

// ---------------------------------------------------------------------------
// 3. Backups and restore
// ---------------------------------------------------------------------------

#[test]
fn backups_rotate_to_retention() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = seeded(dir.path());
    for _ in 0..5 {
        store::backup(&path, 3).unwrap();
    }
    let backups = store::list_backups(&path).unwrap();
    assert_eq!(backups.len(), 3);
    let on_disk = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
        .count();
    assert_eq!(on_disk, 3);
    assert!(backups[0].created_at >= backups[2].created_at);
}

#[test]
fn corrupted_document_restores_from_latest_backup() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = seeded(dir.path());
    let original = store::load(&path).unwrap().ledger().clone();

    let mut st = StateStore::new(&path);
    let mut doc = st.load().unwrap();
    st.save(&mut doc).unwrap();
    fs::write(&path, b"<loom-status><project>").unwrap();

    assert!(matches!(store::load(&path), Err(StoreError::Corrupted { .. })));
    let (entry, restored) = store::restore_latest(&path).unwrap();
    assert!(entry.file.exists());

    let mut expected = original;
    expected.project.last_modified = restored.ledger().project.last_modified;
    assert_eq!(restored.ledger(), &expected);
    assert!(store::load(&path).is_ok());

    let corrupt_kept = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().ends_with(".corrupt"));
    assert!(corrupt_kept);
}

#[test]
fn tampered_backup_fails_checksum() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = seeded(dir.path());
    let entry = store::backup(&path, 10).unwrap();
    fs::write(&entry.file, b"tampered").unwrap();

    let err = store::restore(&path, &entry).unwrap_err();
    assert!(matches!(err, StoreError::ChecksumMismatch { .. }), "got: {err}");
    assert!(matches!(
        store::restore_latest(&path),
        Err(StoreError::ChecksumMismatch { .. })
    ));
}

#[test]
fn restore_without_backups_errors() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = seeded(dir.path());
    assert!(matches!(
        store::restore_latest(&path),
        Err(StoreError::NoBackups { .. })
    ));
}
