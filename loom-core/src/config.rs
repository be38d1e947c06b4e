//! Engine configuration read from `.loom/config.yaml`.
//!
//! Every field is optional; a missing file yields the defaults.
//!
//! ```yaml
//! max_rounds: 3
//! backup_retention: 10
//! apply_optional: true
//! directories: [runbooks]
//! documents:
//!   - file: RUNBOOK.md
//!     title: Runbook
//!     sections: [Alerts, Escalation]
//! agents:
//!   - name: release-manager
//!     role: Cuts releases
//! ```

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::layout::{AgentSpec, Blueprint, DocumentSpec, LOOM_DIR};

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound on validate/apply rounds in one reconciliation run.
    pub max_rounds: u32,
    /// How many state-document backups to keep.
    pub backup_retention: usize,
    /// Whether approved plans also apply optional (non must-fix) findings.
    pub apply_optional: bool,
    pub directories: Vec<PathBuf>,
    pub documents: Vec<DocumentSpec>,
    pub agents: Vec<AgentSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            backup_retention: 10,
            apply_optional: true,
            directories: Vec::new(),
            documents: Vec::new(),
            agents: Vec::new(),
        }
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(LOOM_DIR).join(CONFIG_FILE)
}

impl EngineConfig {
    /// Load `<root>/.loom/config.yaml`, falling back to defaults when absent.
    pub fn load_at(root: &Path) -> Result<Self, ConfigError> {
        let path = config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut cfg: Self = serde_yaml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
        cfg.max_rounds = cfg.max_rounds.max(1);
        cfg.check_paths(&path)?;
        Ok(cfg)
    }

    /// Configured entries are joined onto the project root, so each one must
    /// stay beneath it.
    fn check_paths(&self, path: &Path) -> Result<(), ConfigError> {
        let unsafe_path = |field: &'static str, entry: String| ConfigError::UnsafePath {
            path: path.to_path_buf(),
            field,
            entry,
        };
        for dir in &self.directories {
            if !is_contained(dir) {
                return Err(unsafe_path("directories", dir.display().to_string()));
            }
        }
        for doc in &self.documents {
            if !is_contained(&doc.file) {
                return Err(unsafe_path("documents", doc.file.display().to_string()));
            }
        }
        for agent in &self.agents {
            let name = Path::new(&agent.name);
            if !is_contained(name) || name.components().count() != 1 {
                return Err(unsafe_path("agents", agent.name.clone()));
            }
        }
        Ok(())
    }

    /// The standard blueprint plus any configured extras.
    pub fn blueprint(&self) -> Blueprint {
        let mut bp = Blueprint::standard();
        bp.extend(&self.directories, &self.documents, &self.agents);
        bp
    }
}

fn is_contained(p: &Path) -> bool {
    !p.as_os_str().is_empty() && p.components().all(|c| matches!(c, Component::Normal(_)))
}
