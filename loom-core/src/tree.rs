//! Immutable snapshot of a project's file tree.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::layout::{parse_entity_doc, EntityPath};
use crate::types::EntityRef;

/// Directory names never descended into.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// Relative paths of every file and directory under a root, captured once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    root: PathBuf,
    files: BTreeSet<PathBuf>,
    dirs: BTreeSet<PathBuf>,
}

impl FileTree {
    /// Walk `root`. Only an unreadable root is an error; entries below it
    /// that cannot be read are logged and left out.
    pub fn scan(root: &Path) -> std::io::Result<Self> {
        let mut tree = Self {
            root: root.to_path_buf(),
            ..Self::default()
        };
        if !root.exists() {
            return Ok(tree);
        }
        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && SKIP_DIRS.iter().any(|s| e.file_name() == *s))
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(path = ?err.path(), "skipping unreadable entry: {err}");
                    continue;
                }
            };
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            if entry.file_type().is_dir() {
                tree.dirs.insert(rel.to_path_buf());
            } else {
                tree.files.insert(rel.to_path_buf());
            }
        }
        tracing::debug!(
            root = %root.display(),
            files = tree.files.len(),
            dirs = tree.dirs.len(),
            "scanned file tree"
        );
        Ok(tree)
    }

    /// Build a tree from relative file paths; parent directories are implied.
    pub fn from_files<I, P>(root: &Path, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut tree = Self {
            root: root.to_path_buf(),
            ..Self::default()
        };
        for f in files {
            let f: PathBuf = f.into();
            let mut parent = f.parent();
            while let Some(p) = parent {
                if p.as_os_str().is_empty() {
                    break;
                }
                tree.dirs.insert(p.to_path_buf());
                parent = p.parent();
            }
            tree.files.insert(f);
        }
        tree
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_file(&self, rel: &Path) -> bool {
        self.files.contains(rel)
    }

    pub fn has_dir(&self, rel: &Path) -> bool {
        rel.as_os_str().is_empty() || self.dirs.contains(rel)
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(PathBuf::as_path)
    }

    pub fn absolute(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }

    /// Entity documents found under `features/`, plus paths that look like
    /// entity documents but carry invalid names.
    pub fn entity_documents(&self) -> (Vec<EntityRef>, Vec<String>) {
        let mut entities = Vec::new();
        let mut invalid = Vec::new();
        for f in &self.files {
            match parse_entity_doc(f) {
                Some(EntityPath::Entity(e)) => entities.push(e),
                Some(EntityPath::Invalid(msg)) => invalid.push(msg),
                None => {}
            }
        }
        (entities, invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn scan_skips_vcs_and_build_dirs() {
        let tmp = assert_fs::TempDir::new().expect("tempdir");
        tmp.child("docs/PRD.md").write_str("# PRD").unwrap();
        tmp.child(".git/HEAD").write_str("ref").unwrap();
        tmp.child("target/debug/x").write_str("bin").unwrap();

        let tree = FileTree::scan(tmp.path()).expect("scan");
        assert!(tree.has_file(Path::new("docs/PRD.md")));
        assert!(tree.has_dir(Path::new("docs")));
        assert!(!tree.has_file(Path::new(".git/HEAD")));
        assert!(!tree.has_dir(Path::new("target")));
    }

    #[test]
    #[cfg(unix)]
    fn unreadable_subdirectory_does_not_stop_the_scan() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = assert_fs::TempDir::new().expect("tempdir");
        tmp.child("docs/PRD.md").write_str("# PRD").unwrap();
        tmp.child("locked/secret.md").write_str("x").unwrap();
        let locked = tmp.path().join("locked");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        let tree = FileTree::scan(tmp.path());
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        let tree = tree.expect("scan continues past unreadable directories");
        assert!(tree.has_file(Path::new("docs/PRD.md")));
        assert!(tree.has_dir(Path::new("locked")));
    }

    #[test]
    fn scan_of_missing_root_is_empty() {
        let tmp = assert_fs::TempDir::new().expect("tempdir");
        let tree = FileTree::scan(&tmp.path().join("nope")).expect("scan");
        assert_eq!(tree.files().count(), 0);
    }

    #[test]
    fn from_files_implies_parents() {
        let tree = FileTree::from_files(Path::new("/p"), ["features/a/epics/b/EPIC.md"]);
        assert!(tree.has_dir(Path::new("features/a/epics")));
        let (entities, invalid) = tree.entity_documents();
        assert_eq!(entities.len(), 1);
        assert!(invalid.is_empty());
    }
}
