//! Persistence for the state document.
//!
//! # Storage layout
//!
//! ```text
//! .loom/
//!   status.xml                         (the state document)
//!   status.xml.tmp                     (only while a save is in flight)
//!   status.xml.20261018T120000123Z.bak (backups, newest kept)
//!   backups.json                       (manifest: file, created_at, sha256)
//! ```
//!
//! Saves write a temporary sibling, re-parse it, compare the resulting ledger
//! with the one being saved and only then rename it over the original. A
//! [`StateStore`] takes one backup before the first save of its lifetime.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::document::StatusDocument;
use crate::error::{io_err, StoreError};

pub const MANIFEST_FILE: &str = "backups.json";
pub const DEFAULT_RETENTION: usize = 10;

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// `status.xml` -> `status.xml.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    sibling(path, ".tmp")
}

pub fn manifest_path(path: &Path) -> PathBuf {
    path.with_file_name(MANIFEST_FILE)
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ---------------------------------------------------------------------------
// 2. Load / save
// ---------------------------------------------------------------------------

/// Load and validate the document at `path`.
///
/// Returns [`StoreError::NotFound`] if absent and [`StoreError::Corrupted`]
/// if the bytes are not a well-formed, schema-valid document.
pub fn load(path: &Path) -> Result<StatusDocument, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let bytes = std::fs::read(path).map_err(io_err(path))?;
    StatusDocument::parse_bytes(&bytes).map_err(|e| StoreError::Corrupted {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Stamp, render and atomically replace the document at `path`.
///
/// The temporary file is removed on every failure path, leaving the previous
/// document untouched.
pub fn save(doc: &mut StatusDocument, path: &Path) -> Result<(), StoreError> {
    doc.ledger_mut().project.last_modified = Some(Utc::now().trunc_subsecs(0));
    let rendered = doc.render();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, rendered.as_bytes()).map_err(io_err(&tmp))?;

    if let Err(e) = verify_written(&tmp, doc, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        io_err(path)(e)
    })?;
    tracing::debug!(path = %path.display(), bytes = rendered.len(), "state document saved");
    Ok(())
}

fn verify_written(tmp: &Path, doc: &StatusDocument, target: &Path) -> Result<(), StoreError> {
    let bytes = std::fs::read(tmp).map_err(io_err(tmp))?;
    let reparsed =
        StatusDocument::parse_bytes(&bytes).map_err(|e| StoreError::Verification {
            path: target.to_path_buf(),
            reason: e.to_string(),
        })?;
    if reparsed.ledger() != doc.ledger() {
        return Err(StoreError::Verification {
            path: target.to_path_buf(),
            reason: "re-parsed ledger differs from the one being saved".into(),
        });
    }
    Ok(())
}

/// A handle on one state document that backs it up before the first save.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    retention: usize,
    backed_up: bool,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retention: DEFAULT_RETENTION,
            backed_up: false,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<StatusDocument, StoreError> {
        load(&self.path)
    }

    /// Save `doc`, taking a backup of the current file first if this store
    /// has not saved before and a file exists.
    pub fn save(&mut self, doc: &mut StatusDocument) -> Result<(), StoreError> {
        if !self.backed_up && self.path.exists() {
            let entry = backup(&self.path, self.retention)?;
            tracing::info!(backup = %entry.file.display(), "backed up state document");
        }
        self.backed_up = true;
        save(doc, &self.path)
    }

    pub fn backups(&self) -> Result<Vec<BackupEntry>, StoreError> {
        list_backups(&self.path)
    }
}

// ---------------------------------------------------------------------------
// 3. Backups
// ---------------------------------------------------------------------------

/// A recorded backup. `file` is absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub file: PathBuf,
    pub created_at: DateTime<Utc>,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    backups: Vec<ManifestRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestRecord {
    file: String,
    created_at: DateTime<Utc>,
    sha256: String,
}

fn read_manifest(path: &Path) -> Result<Manifest, StoreError> {
    let mpath = manifest_path(path);
    if !mpath.exists() {
        return Ok(Manifest::default());
    }
    let text = std::fs::read_to_string(&mpath).map_err(io_err(&mpath))?;
    serde_json::from_str(&text).map_err(|source| StoreError::Manifest {
        path: mpath,
        source,
    })
}

fn write_manifest(path: &Path, manifest: &Manifest) -> Result<(), StoreError> {
    let mpath = manifest_path(path);
    let json = serde_json::to_string_pretty(manifest).map_err(|source| StoreError::Manifest {
        path: mpath.clone(),
        source,
    })?;
    let tmp = tmp_path(&mpath);
    std::fs::write(&tmp, json).map_err(io_err(&tmp))?;
    std::fs::rename(&tmp, &mpath).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        io_err(&mpath)(e)
    })
}

/// Copy the current document to a timestamped sibling, record its checksum
/// and drop the oldest backups beyond `retention`.
pub fn backup(path: &Path, retention: usize) -> Result<BackupEntry, StoreError> {
    let bytes = std::fs::read(path).map_err(io_err(path))?;
    let now = Utc::now();
    let stamp = now.format("%Y%m%dT%H%M%S%3fZ").to_string();

    let mut target = sibling(path, &format!(".{stamp}.bak"));
    let mut n = 1;
    while target.exists() {
        target = sibling(path, &format!(".{stamp}-{n}.bak"));
        n += 1;
    }
    std::fs::write(&target, &bytes).map_err(io_err(&target))?;

    let sha256 = sha256_hex(&bytes);
    let file = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut manifest = read_manifest(path)?;
    manifest.backups.push(ManifestRecord {
        file,
        created_at: now,
        sha256: sha256.clone(),
    });
    manifest
        .backups
        .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.file.cmp(&b.file)));
    let keep = retention.max(1);
    if manifest.backups.len() > keep {
        let excess = manifest.backups.len() - keep;
        for old in manifest.backups.drain(..excess) {
            let old_path = path.with_file_name(&old.file);
            match std::fs::remove_file(&old_path) {
                Ok(()) => tracing::debug!(file = %old_path.display(), "rotated out backup"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&old_path)(e)),
            }
        }
    }
    write_manifest(path, &manifest)?;

    Ok(BackupEntry {
        file: target,
        created_at: now,
        sha256,
    })
}

/// Recorded backups whose files still exist, newest first.
pub fn list_backups(path: &Path) -> Result<Vec<BackupEntry>, StoreError> {
    let manifest = read_manifest(path)?;
    let mut out: Vec<BackupEntry> = manifest
        .backups
        .into_iter()
        .map(|r| BackupEntry {
            file: path.with_file_name(&r.file),
            created_at: r.created_at,
            sha256: r.sha256,
        })
        .filter(|e| e.file.exists())
        .collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.file.cmp(&a.file)));
    Ok(out)
}

/// Check a backup's bytes against its recorded checksum.
pub fn verify_backup(entry: &BackupEntry) -> Result<Vec<u8>, StoreError> {
    let bytes = std::fs::read(&entry.file).map_err(io_err(&entry.file))?;
    let actual = sha256_hex(&bytes);
    if actual != entry.sha256 {
        return Err(StoreError::ChecksumMismatch {
            path: entry.file.clone(),
            expected: entry.sha256.clone(),
            actual,
        });
    }
    Ok(bytes)
}

/// Replace the document at `path` with a verified backup.
///
/// A current document that no longer loads is kept beside it as
/// `status.xml.<stamp>.corrupt`.
pub fn restore(path: &Path, entry: &BackupEntry) -> Result<StatusDocument, StoreError> {
    let bytes = verify_backup(entry)?;
    let doc = StatusDocument::parse_bytes(&bytes).map_err(|e| StoreError::Corrupted {
        path: entry.file.clone(),
        reason: e.to_string(),
    })?;

    if path.exists() && matches!(load(path), Err(StoreError::Corrupted { .. })) {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let aside = sibling(path, &format!(".{stamp}.corrupt"));
        std::fs::copy(path, &aside).map_err(io_err(&aside))?;
        tracing::warn!(file = %aside.display(), "kept corrupted state document");
    }

    let tmp = tmp_path(path);
    std::fs::write(&tmp, &bytes).map_err(io_err(&tmp))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        io_err(path)(e)
    })?;
    tracing::info!(from = %entry.file.display(), "restored state document");
    Ok(doc)
}

/// Restore the newest backup that passes checksum and schema validation.
pub fn restore_latest(path: &Path) -> Result<(BackupEntry, StatusDocument), StoreError> {
    let backups = list_backups(path)?;
    if backups.is_empty() {
        return Err(StoreError::NoBackups {
            path: path.to_path_buf(),
        });
    }
    let mut last_err = None;
    for entry in backups {
        match restore(path, &entry) {
            Ok(doc) => return Ok((entry, doc)),
            Err(e @ (StoreError::ChecksumMismatch { .. } | StoreError::Corrupted { .. })) => {
                tracing::warn!(backup = %entry.file.display(), error = %e, "skipping unusable backup");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(StoreError::NoBackups {
        path: path.to_path_buf(),
    }))
}
