//! On-disk layout of a Loom project.
//!
//! # Standard layout
//!
//! ```text
//! <root>/
//!   .loom/
//!     status.xml                  (state document)
//!     status.xml.<stamp>.bak      (rotated backups)
//!     backups.json                (backup manifest with sha256 checksums)
//!     config.yaml                 (optional engine configuration)
//!     templates/                  (optional template overrides)
//!   docs/<DOC>.md                 (required project documents)
//!   .claude/agents/<agent>.md     (agent definitions)
//!   .claude/settings.json
//!   CLAUDE.md
//!   features/<feature>/FEATURE.md
//!   features/<feature>/epics/<epic>/EPIC.md
//!   features/<feature>/epics/<epic>/stories/<story>.md
//! ```
//!
//! The legacy flat layout keeps `status.xml` and the documents at the root.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{EntityRef, EpicName, FeatureName, StoryId};

pub const LOOM_DIR: &str = ".loom";
pub const STATUS_FILE: &str = "status.xml";
pub const DOCS_DIR: &str = "docs";
pub const FEATURES_DIR: &str = "features";
pub const AGENTS_DIR: &str = ".claude/agents";
pub const SETTINGS_FILE: &str = ".claude/settings.json";
pub const INSTRUCTIONS_FILE: &str = "CLAUDE.md";
pub const TEMPLATES_DIR: &str = ".loom/templates";

// ---------------------------------------------------------------------------
// 1. Layout variants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Flat,
    Standard,
}

impl Layout {
    /// Path of the state document relative to the project root.
    pub fn status_file(self) -> PathBuf {
        match self {
            Layout::Flat => PathBuf::from(STATUS_FILE),
            Layout::Standard => Path::new(LOOM_DIR).join(STATUS_FILE),
        }
    }

    /// Directory holding the required documents, relative to the root.
    pub fn docs_dir(self) -> PathBuf {
        match self {
            Layout::Flat => PathBuf::new(),
            Layout::Standard => PathBuf::from(DOCS_DIR),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Flat => write!(f, "flat"),
            Layout::Standard => write!(f, "standard"),
        }
    }
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(Layout::Flat),
            "standard" => Ok(Layout::Standard),
            other => Err(format!("unknown layout '{other}' (expected flat or standard)")),
        }
    }
}

/// Absolute path of the standard state document under `root`.
pub fn status_path(root: &Path) -> PathBuf {
    root.join(Layout::Standard.status_file())
}

// ---------------------------------------------------------------------------
// 2. Entity documents
// ---------------------------------------------------------------------------

pub fn feature_doc(feature: &FeatureName) -> PathBuf {
    Path::new(FEATURES_DIR)
        .join(feature.as_str())
        .join("FEATURE.md")
}

pub fn epic_doc(feature: &FeatureName, epic: &EpicName) -> PathBuf {
    Path::new(FEATURES_DIR)
        .join(feature.as_str())
        .join("epics")
        .join(epic.as_str())
        .join("EPIC.md")
}

pub fn story_doc(feature: &FeatureName, epic: &EpicName, story: &StoryId) -> PathBuf {
    Path::new(FEATURES_DIR)
        .join(feature.as_str())
        .join("epics")
        .join(epic.as_str())
        .join("stories")
        .join(format!("{story}.md"))
}

/// The document that represents `entity` on disk, relative to the root.
pub fn entity_doc(entity: &EntityRef) -> PathBuf {
    match entity {
        EntityRef::Feature { feature } => feature_doc(feature),
        EntityRef::Epic { feature, epic } => epic_doc(feature, epic),
        EntityRef::Story {
            feature,
            epic,
            story,
        } => story_doc(feature, epic, story),
    }
}

/// What a relative path under `features/` denotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityPath {
    Entity(EntityRef),
    /// Looks like an entity document but a name segment is invalid.
    Invalid(String),
}

/// Classify a relative file path as an entity document, if it is one.
pub fn parse_entity_doc(rel: &Path) -> Option<EntityPath> {
    let parts: Vec<&str> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;

    let invalid = |what: &str| Some(EntityPath::Invalid(format!("{}: {what}", rel.display())));

    match parts.as_slice() {
        [FEATURES_DIR, f, "FEATURE.md"] => match FeatureName::new(*f) {
            Ok(feature) => Some(EntityPath::Entity(EntityRef::Feature { feature })),
            Err(e) => invalid(&e.to_string()),
        },
        [FEATURES_DIR, f, "epics", e, "EPIC.md"] => {
            match (FeatureName::new(*f), EpicName::new(*e)) {
                (Ok(feature), Ok(epic)) => Some(EntityPath::Entity(EntityRef::Epic { feature, epic })),
                (Err(err), _) | (_, Err(err)) => invalid(&err.to_string()),
            }
        }
        [FEATURES_DIR, f, "epics", e, "stories", file] => {
            let stem = file.strip_suffix(".md")?;
            match (FeatureName::new(*f), EpicName::new(*e), StoryId::new(stem)) {
                (Ok(feature), Ok(epic), Ok(story)) => Some(EntityPath::Entity(EntityRef::Story {
                    feature,
                    epic,
                    story,
                })),
                (Err(err), _, _) | (_, Err(err), _) | (_, _, Err(err)) => {
                    invalid(&err.to_string())
                }
            }
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// 3. Blueprint
// ---------------------------------------------------------------------------

/// A required Markdown document and the section headings it must contain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentSpec {
    /// File name relative to the documents directory.
    pub file: PathBuf,
    pub title: String,
    #[serde(default)]
    pub sections: Vec<String>,
}

/// A required agent definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub responsibilities: Vec<String>,
}

impl AgentSpec {
    pub fn file(&self) -> PathBuf {
        Path::new(AGENTS_DIR).join(format!("{}.md", self.name))
    }
}

/// Everything a structurally complete project must contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Blueprint {
    pub directories: Vec<PathBuf>,
    pub documents: Vec<DocumentSpec>,
    pub agents: Vec<AgentSpec>,
}

const STANDARD_DOCUMENTS: &[(&str, &str, &[&str])] = &[
    ("PROJECT_OVERVIEW.md", "Project Overview", &["Summary", "Goals", "Stakeholders"]),
    ("PRD.md", "Product Requirements", &["Problem Statement", "Users", "Features", "Success Metrics"]),
    ("REQUIREMENTS.md", "Requirements", &["Functional Requirements", "Non-Functional Requirements"]),
    ("ARCHITECTURE.md", "Architecture", &["Overview", "Components", "Data Flow"]),
    ("TECHNICAL_DESIGN.md", "Technical Design", &["Interfaces", "Data Model", "Error Handling"]),
    ("DESIGN_SYSTEM.md", "Design System", &["Principles", "Components"]),
    ("DEVELOPMENT_PLAN.md", "Development Plan", &["Milestones", "Workflow"]),
    ("TESTING_STRATEGY.md", "Testing Strategy", &["Unit Tests", "Integration Tests", "Coverage"]),
    ("CODE_REVIEW.md", "Code Review", &["Checklist", "Process"]),
    ("SECURITY.md", "Security", &["Threat Model", "Controls"]),
    ("DEPLOYMENT.md", "Deployment", &["Environments", "Release Process"]),
    ("INSTALLATION.md", "Installation", &["Prerequisites", "Setup"]),
];

const STANDARD_AGENTS: &[(&str, &str, &[&str])] = &[
    ("coordinator", "Plans work and keeps the status document current", &[
        "Select the next story and task",
        "Inject review findings as review tasks",
    ]),
    ("backend-developer", "Implements server-side tasks", &[
        "Implement the current task",
        "Record the commit that completes it",
    ]),
    ("frontend-developer", "Implements user-facing tasks", &[
        "Implement the current task",
        "Follow the design system",
    ]),
    ("test-engineer", "Writes and maintains tests", &[
        "Cover every completed task with tests",
        "Keep the testing strategy current",
    ]),
    ("code-reviewer", "Reviews stories waiting for review", &[
        "Review the story against the code review checklist",
        "Report findings as review tasks",
    ]),
    ("documentation-writer", "Keeps project documents accurate", &[
        "Update documents affected by each story",
    ]),
];

impl Blueprint {
    /// The blueprint every standard-layout project is checked against.
    pub fn standard() -> Self {
        Self {
            directories: [DOCS_DIR, FEATURES_DIR, ".claude", AGENTS_DIR, LOOM_DIR]
                .iter()
                .map(PathBuf::from)
                .collect(),
            documents: STANDARD_DOCUMENTS
                .iter()
                .map(|(file, title, sections)| DocumentSpec {
                    file: PathBuf::from(file),
                    title: (*title).to_owned(),
                    sections: sections.iter().map(|s| (*s).to_owned()).collect(),
                })
                .collect(),
            agents: STANDARD_AGENTS
                .iter()
                .map(|(name, role, resp)| AgentSpec {
                    name: (*name).to_owned(),
                    role: (*role).to_owned(),
                    responsibilities: resp.iter().map(|s| (*s).to_owned()).collect(),
                })
                .collect(),
        }
    }

    /// Add extra requirements; entries already present are ignored.
    pub fn extend(
        &mut self,
        directories: &[PathBuf],
        documents: &[DocumentSpec],
        agents: &[AgentSpec],
    ) {
        for d in directories {
            if !self.directories.contains(d) {
                self.directories.push(d.clone());
            }
        }
        for doc in documents {
            if !self.documents.iter().any(|x| x.file == doc.file) {
                self.documents.push(doc.clone());
            }
        }
        for a in agents {
            if !self.agents.iter().any(|x| x.name == a.name) {
                self.agents.push(a.clone());
            }
        }
    }

    pub fn document_path(&self, doc: &DocumentSpec) -> PathBuf {
        Path::new(DOCS_DIR).join(&doc.file)
    }
}

/// Section headings present in a Markdown body, as written.
pub fn markdown_headings(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            let hashes = trimmed.chars().take_while(|c| *c == '#').count();
            if hashes == 0 || hashes > 6 {
                return None;
            }
            let rest = &trimmed[hashes..];
            if !rest.starts_with(' ') {
                return None;
            }
            Some(rest.trim().trim_end_matches('#').trim().to_owned())
        })
        .collect()
}

/// Required sections of `spec` that `body` lacks, compared case-insensitively.
pub fn missing_sections<'a>(spec: &'a DocumentSpec, body: &str) -> Vec<&'a str> {
    let present: Vec<String> = markdown_headings(body)
        .into_iter()
        .map(|h| h.to_lowercase())
        .collect();
    spec.sections
        .iter()
        .filter(|s| !present.contains(&s.to_lowercase()))
        .map(String::as_str)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
