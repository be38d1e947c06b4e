//! Error types for loom-core.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::StoryStatus;

/// Errors raised while reading, writing, backing up or restoring the state
/// document.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the path that failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state document did not exist at the expected path.
    #[error("state document not found at {path}")]
    NotFound { path: PathBuf },

    /// The document exists but is not well-formed or violates the schema.
    #[error("state document at {path} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// The freshly written temporary copy did not re-parse to the same ledger.
    #[error("refusing to replace {path}: written copy failed verification ({reason})")]
    Verification { path: PathBuf, reason: String },

    /// `restore` was asked for a backup but none are recorded.
    #[error("no backups recorded for {path}")]
    NoBackups { path: PathBuf },

    /// A backup file no longer matches the checksum recorded when it was taken.
    #[error("backup {path} failed checksum verification (expected {expected}, found {actual})")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The backup manifest could not be (de)serialized.
    #[error("backup manifest at {path} is invalid: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A requested mutation that would break a hierarchy or lifecycle rule.
///
/// Every variant is raised before anything is changed, so the ledger is left
/// exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("story '{story}' cannot move from {from} to {to}")]
    IllegalTransition {
        story: String,
        from: StoryStatus,
        to: StoryStatus,
    },

    #[error("story '{story}' still has {open_tasks} open task(s) and {review_tasks} review task(s)")]
    OpenWork {
        story: String,
        open_tasks: usize,
        review_tasks: usize,
    },

    #[error("review tasks can only be injected into a story that is waiting-for-review or done; '{story}' is {status}")]
    ReviewNotAllowed { story: String, status: StoryStatus },

    #[error("review batch for '{story}' is empty")]
    EmptyReview { story: String },

    #[error("task '{task}' in story '{story}' is already complete")]
    TaskAlreadyComplete { story: String, task: String },

    #[error("more than one feature is active: {}", features.join(", "))]
    MultipleActiveFeatures { features: Vec<String> },
}

/// Errors loading `.loom/config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error, including serde_yaml's line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A configured path would resolve outside the project.
    #[error("config at {path}: {field} entry '{entry}' must be a relative path inside the project")]
    UnsafePath {
        path: PathBuf,
        field: &'static str,
        entry: String,
    },
}

/// Build a closure that attaches `path` to an [`std::io::Error`].
pub fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
