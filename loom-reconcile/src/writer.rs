//! Atomic, content-gated file writes used by reconcilers and scaffolding.
//!
//! ## `atomic_write` protocol
//!
//! 1. Normalise line endings to LF.
//! 2. SHA-256 the new content and whatever is on disk.
//! 3. Equal digests: report `Unchanged` and touch nothing.
//! 4. Write to `<path>.loom.tmp`, creating parent directories.
//! 5. Rename over the final path; on failure remove the `.tmp`.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{worker_io, WorkerError};

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// A new file was created.
    Created { path: PathBuf },
    /// An existing file got new content.
    Updated { path: PathBuf },
    /// Content on disk already matches, or the file exists and is kept.
    Unchanged { path: PathBuf },
}

fn digest(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.loom.tmp", path.display()))
}

/// Atomically replace `path` with `content` unless it already holds it.
pub fn atomic_write(path: &Path, content: &str) -> Result<WriteResult, WorkerError> {
    let normalized = content.replace("\r\n", "\n");
    let content = normalized.as_str();

    let existed = path.is_file();
    if existed {
        let current = fs::read(path).map_err(|e| worker_io(path, e))?;
        if digest(&current) == digest(content.as_bytes()) {
            tracing::debug!("unchanged: {}", path.display());
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| worker_io(parent, e))?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, content).map_err(|e| worker_io(&tmp, e))?;

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(worker_io(path, e));
    }

    tracing::info!("wrote: {}", path.display());
    let path = path.to_path_buf();
    Ok(if existed {
        WriteResult::Updated { path }
    } else {
        WriteResult::Created { path }
    })
}

/// Create `path` with `content` when it is missing or blank. Existing
/// non-blank content is never touched.
pub fn write_if_absent(path: &Path, content: &str) -> Result<WriteResult, WorkerError> {
    if path.exists() {
        let current = fs::read_to_string(path).map_err(|e| worker_io(path, e))?;
        if !current.trim().is_empty() {
            tracing::debug!("kept existing: {}", path.display());
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }
    atomic_write(path, content)
}

/// Append `addition` to the end of `path`, separated by a blank line.
pub fn append(path: &Path, addition: &str) -> Result<WriteResult, WorkerError> {
    let current = fs::read_to_string(path).map_err(|e| worker_io(path, e))?;
    if addition.trim().is_empty() {
        return Ok(WriteResult::Unchanged {
            path: path.to_path_buf(),
        });
    }
    let mut next = current;
    if !next.is_empty() && !next.ends_with('\n') {
        next.push('\n');
    }
    if !next.is_empty() && !next.ends_with("\n\n") {
        next.push('\n');
    }
    next.push_str(addition.trim_start_matches('\n'));
    atomic_write(path, &next)
}

/// Create a directory (and parents). Reports whether it already existed.
pub fn ensure_dir(path: &Path) -> Result<WriteResult, WorkerError> {
    if path.is_dir() {
        return Ok(WriteResult::Unchanged {
            path: path.to_path_buf(),
        });
    }
    fs::create_dir_all(path).map_err(|e| worker_io(path, e))?;
    tracing::info!("created directory: {}", path.display());
    Ok(WriteResult::Created {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_write_creates_then_same_content_is_unchanged() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("CLAUDE.md");
        assert!(matches!(atomic_write(&path, "hello").unwrap(), WriteResult::Created { .. }));
        assert!(matches!(atomic_write(&path, "hello").unwrap(), WriteResult::Unchanged { .. }));
        assert!(matches!(atomic_write(&path, "bye").unwrap(), WriteResult::Updated { .. }));
    }

    #[test]
    fn write_if_absent_scaffolds_nested_agent_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".claude/agents/coordinator.md");
        let r = write_if_absent(&path, "# Coordinator\r\n").unwrap();
        assert_eq!(r, WriteResult::Created { path: path.clone() });
        assert_eq!(fs::read_to_string(&path).unwrap(), "# Coordinator\n");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn write_if_absent_keeps_user_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("PRD.md");
        fs::write(&path, "mine").unwrap();
        let r = write_if_absent(&path, "template").unwrap();
        assert!(matches!(r, WriteResult::Unchanged { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "mine");

        fs::write(&path, "\n").unwrap();
        let r = write_if_absent(&path, "template").unwrap();
        assert!(matches!(r, WriteResult::Updated { .. }));
    }

    #[test]
    fn append_separates_with_blank_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.md");
        fs::write(&path, "# Title\nbody").unwrap();
        append(&path, "## Extra\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "# Title\nbody\n\n## Extra\n");
    }

    #[test]
    fn append_to_crlf_document_leaves_lf_only() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("PRD.md");
        fs::write(&path, "# PRD\r\nintro\r\n").unwrap();
        let r = append(&path, "## Success Metrics\n").unwrap();
        assert!(matches!(r, WriteResult::Updated { .. }));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# PRD\nintro\n\n## Success Metrics\n"
        );
    }

    #[test]
    fn append_blank_or_to_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.md");
        assert!(append(&path, "## Extra").is_err());
        fs::write(&path, "# Title\n").unwrap();
        assert!(matches!(append(&path, "  \n").unwrap(), WriteResult::Unchanged { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "# Title\n");
    }

    #[test]
    fn rename_failure_leaves_destination_and_cleans_tmp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("PRD.md");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("keep.txt"), "original").unwrap();

        let result = atomic_write(&path, "new content");
        assert!(result.is_err(), "{result:?}");
        assert_eq!(fs::read_to_string(path.join("keep.txt")).unwrap(), "original");
        assert!(!tmp_path(&path).exists(), ".loom.tmp should be cleaned up");
    }

    #[test]
    fn ensure_dir_reports_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("features");
        assert!(matches!(ensure_dir(&path).unwrap(), WriteResult::Created { .. }));
        assert!(matches!(ensure_dir(&path).unwrap(), WriteResult::Unchanged { .. }));
    }
}
