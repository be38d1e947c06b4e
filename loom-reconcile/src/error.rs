//! Error types for loom-reconcile.

use std::path::PathBuf;

use thiserror::Error;

use loom_core::{ConfigError, InvariantViolation, StoreError};
use loom_detector::DetectError;
use loom_renderer::RenderError;

/// Errors that halt an engine operation and reach the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("project at {path} is already initialised")]
    AlreadyInitialized { path: PathBuf },

    #[error("layout mismatch: asked to migrate from {expected} but {path} looks {found}")]
    LayoutMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Write(#[from] WorkerError),

    /// A blocking orchestration step could not be joined.
    #[error("engine task failed: {0}")]
    Join(String),
}

/// A failure contained at the boundary of a single validator or reconciler.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("{0}")]
    Failed(String),
}

/// Convenience constructor for [`EngineError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`WorkerError::Io`].
pub(crate) fn worker_io(path: impl Into<PathBuf>, source: std::io::Error) -> WorkerError {
    WorkerError::Io {
        path: path.into(),
        source,
    }
}
