//! Layout detection for `loom-detector`.
//!
//! `detect_layout(path)` inspects indicator files in a project root and
//! reports which on-disk layout it follows. Checks are ordered by
//! specificity: the standard `.loom/status.xml` wins over legacy flat
//! indicators, and a state document beats loose documents.

use std::fs;
use std::path::{Path, PathBuf};

use loom_core::document::ROOT_ELEMENT;
use loom_core::layout::{Blueprint, Layout, DOCS_DIR};
use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Confidence level of a detected layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// State document present and recognisably a Loom document.
    High,
    /// Only secondary indicators (documents, or a state file of unknown shape).
    Medium,
}

/// A detected project layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedLayout {
    pub layout: Layout,
    pub confidence: Confidence,
    /// Indicator files that led to the verdict, relative to the root.
    pub indicators: Vec<PathBuf>,
    /// Flat-layout files still sitting at the root of a standard project.
    pub leftovers: Vec<PathBuf>,
}

/// Errors from layout detection.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not determine layout for '{path}': no state document or required document found")]
    UnknownLayout { path: PathBuf },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DetectError + '_ {
    move |source| DetectError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Detect the layout of the project at `path`.
///
/// Returns `DetectError::UnknownLayout` when neither layout has a single
/// indicator present.
pub fn detect_layout(path: &Path) -> Result<DetectedLayout, DetectError> {
    let blueprint = Blueprint::standard();

    if let Some(mut found) = detect_standard(path, &blueprint)? {
        found.leftovers = flat_indicators(path, &blueprint);
        return Ok(found);
    }
    if let Some(found) = detect_flat(path, &blueprint)? {
        return Ok(found);
    }

    Err(DetectError::UnknownLayout {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Per-layout detectors
// ---------------------------------------------------------------------------

fn detect_standard(path: &Path, blueprint: &Blueprint) -> Result<Option<DetectedLayout>, DetectError> {
    let status = Layout::Standard.status_file();
    if path.join(&status).is_file() {
        let confidence = state_confidence(&path.join(&status))?;
        return Ok(Some(DetectedLayout {
            layout: Layout::Standard,
            confidence,
            indicators: vec![status],
            leftovers: Vec::new(),
        }));
    }

    let docs: Vec<PathBuf> = blueprint
        .documents
        .iter()
        .map(|d| Path::new(DOCS_DIR).join(&d.file))
        .filter(|rel| path.join(rel).is_file())
        .collect();
    if docs.is_empty() {
        return Ok(None);
    }
    Ok(Some(DetectedLayout {
        layout: Layout::Standard,
        confidence: Confidence::Medium,
        indicators: docs,
        leftovers: Vec::new(),
    }))
}

fn detect_flat(path: &Path, blueprint: &Blueprint) -> Result<Option<DetectedLayout>, DetectError> {
    let indicators = flat_indicators(path, blueprint);
    if indicators.is_empty() {
        return Ok(None);
    }

    let status = Layout::Flat.status_file();
    let confidence = if indicators.contains(&status) {
        state_confidence(&path.join(&status))?
    } else {
        Confidence::Medium
    };
    Ok(Some(DetectedLayout {
        layout: Layout::Flat,
        confidence,
        indicators,
        leftovers: Vec::new(),
    }))
}

/// Root-level state document and required documents, in blueprint order.
fn flat_indicators(path: &Path, blueprint: &Blueprint) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let status = Layout::Flat.status_file();
    if path.join(&status).is_file() {
        found.push(status);
    }
    for doc in &blueprint.documents {
        if path.join(&doc.file).is_file() {
            found.push(doc.file.clone());
        }
    }
    found
}

/// A state file whose root element names Loom is definitive; anything else
/// at that path only hints at the layout.
fn state_confidence(file: &Path) -> Result<Confidence, DetectError> {
    let bytes = fs::read(file).map_err(io_err(file))?;
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]);
    let marker = format!("<{ROOT_ELEMENT}");
    if head.contains(&marker) {
        Ok(Confidence::High)
    } else {
        Ok(Confidence::Medium)
    }
}
