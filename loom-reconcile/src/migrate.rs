//! Move a project between the flat and standard layouts.
//!
//! Only the state document and the blueprint's documents move. A move whose
//! destination already exists is reported as a conflict and left alone;
//! nothing is ever overwritten.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use loom_core::{store, EngineConfig, Layout};
use loom_detector::detect_layout;

use crate::error::{io_err, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MoveStatus {
    Moved,
    WouldMove,
    /// Destination exists; source kept.
    Conflict,
    /// Nothing at the source path.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMove {
    pub from: PathBuf,
    pub to: PathBuf,
    pub status: MoveStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from: Layout,
    pub to: Layout,
    pub dry_run: bool,
    pub moves: Vec<PlannedMove>,
}

impl MigrationReport {
    pub fn conflicts(&self) -> impl Iterator<Item = &PlannedMove> {
        self.moves.iter().filter(|m| m.status == MoveStatus::Conflict)
    }

    pub fn moved(&self) -> usize {
        self.moves
            .iter()
            .filter(|m| matches!(m.status, MoveStatus::Moved | MoveStatus::WouldMove))
            .count()
    }
}

/// Migrate the project at `root` from `from` to `to`.
///
/// The detected layout must match `from`, and a state document being moved
/// must load cleanly first.
pub fn migrate(root: &Path, from: Layout, to: Layout, dry_run: bool) -> Result<MigrationReport, EngineError> {
    let mut report = MigrationReport {
        from,
        to,
        dry_run,
        moves: Vec::new(),
    };
    if from == to {
        return Ok(report);
    }

    let detected = detect_layout(root)?;
    if detected.layout != from {
        return Err(EngineError::LayoutMismatch {
            path: root.to_path_buf(),
            expected: from.to_string(),
            found: detected.layout.to_string(),
        });
    }

    let source_status = root.join(from.status_file());
    if source_status.exists() {
        store::load(&source_status)?;
    }

    let blueprint = EngineConfig::load_at(root)?.blueprint();
    let mut pairs = vec![(from.status_file(), to.status_file())];
    pairs.extend(
        blueprint
            .documents
            .iter()
            .map(|d| (from.docs_dir().join(&d.file), to.docs_dir().join(&d.file))),
    );

    for (src, dst) in pairs {
        let status = move_one(root, &src, &dst, dry_run)?;
        report.moves.push(PlannedMove {
            from: src,
            to: dst,
            status,
        });
    }
    Ok(report)
}

fn move_one(root: &Path, src: &Path, dst: &Path, dry_run: bool) -> Result<MoveStatus, EngineError> {
    let (abs_src, abs_dst) = (root.join(src), root.join(dst));
    if !abs_src.is_file() {
        return Ok(MoveStatus::Missing);
    }
    if abs_dst.exists() {
        tracing::warn!(from = %src.display(), to = %dst.display(), "destination exists, skipping");
        return Ok(MoveStatus::Conflict);
    }
    if dry_run {
        return Ok(MoveStatus::WouldMove);
    }
    if let Some(parent) = abs_dst.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::rename(&abs_src, &abs_dst).map_err(|e| io_err(&abs_src, e))?;
    tracing::info!(from = %src.display(), to = %dst.display(), "moved");
    Ok(MoveStatus::Moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::{Ledger, StatusDocument};
    use tempfile::TempDir;

    fn flat_project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let mut doc = StatusDocument::from_ledger(Ledger::new("legacy"));
        store::save(&mut doc, &dir.path().join("status.xml")).unwrap();
        fs::write(dir.path().join("PRD.md"), "# PRD\n").unwrap();
        fs::write(dir.path().join("SECURITY.md"), "# Security\n").unwrap();
        dir
    }

    #[test]
    fn dry_run_plans_without_touching_files() {
        let dir = flat_project();
        let report = migrate(dir.path(), Layout::Flat, Layout::Standard, true).unwrap();
        assert_eq!(report.moved(), 3);
        assert!(dir.path().join("status.xml").exists());
        assert!(!dir.path().join(".loom").exists());
    }

    #[test]
    fn flat_to_standard_moves_state_and_documents() {
        let dir = flat_project();
        let report = migrate(dir.path(), Layout::Flat, Layout::Standard, false).unwrap();
        assert_eq!(report.moved(), 3);
        assert!(dir.path().join(".loom/status.xml").is_file());
        assert!(dir.path().join("docs/PRD.md").is_file());
        assert!(!dir.path().join("PRD.md").exists());
        assert!(store::load(&dir.path().join(".loom/status.xml")).is_ok());
    }

    #[test]
    fn existing_destination_is_a_conflict() {
        let dir = flat_project();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/PRD.md"), "# newer\n").unwrap();

        let report = migrate(dir.path(), Layout::Flat, Layout::Standard, false).unwrap();
        let conflicts: Vec<_> = report.conflicts().collect();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].from, PathBuf::from("PRD.md"));
        assert_eq!(fs::read_to_string(dir.path().join("docs/PRD.md")).unwrap(), "# newer\n");
        assert!(dir.path().join("PRD.md").exists());
    }

    #[test]
    fn wrong_source_layout_is_rejected() {
        let dir = flat_project();
        let err = migrate(dir.path(), Layout::Standard, Layout::Flat, false).unwrap_err();
        assert!(matches!(err, EngineError::LayoutMismatch { .. }));
    }

    #[test]
    fn corrupted_state_blocks_migration() {
        let dir = flat_project();
        fs::write(dir.path().join("status.xml"), "<loom-status><oops>").unwrap();
        let err = migrate(dir.path(), Layout::Flat, Layout::Standard, false).unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
        assert!(dir.path().join("status.xml").exists());
    }
}
