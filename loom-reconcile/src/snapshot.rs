//! The immutable input every worker of a phase shares.

use std::path::{Path, PathBuf};

use loom_core::{Blueprint, FileTree, Ledger, Model};

use crate::error::{io_err, EngineError};

/// Hierarchy model, file tree and blueprint captured at one barrier.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub root: PathBuf,
    pub model: Model,
    pub tree: FileTree,
    pub blueprint: Blueprint,
}

impl Snapshot {
    /// Scan `root` and resolve `ledger` against it.
    pub fn capture(root: &Path, ledger: Ledger, blueprint: Blueprint) -> Result<Self, EngineError> {
        let tree = FileTree::scan(root).map_err(|e| io_err(root, e))?;
        let model = Model::build(ledger, &tree);
        Ok(Self {
            root: root.to_path_buf(),
            model,
            tree,
            blueprint,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        self.model.ledger()
    }

    /// Absolute path of a project-relative path.
    pub fn absolute(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }
}
