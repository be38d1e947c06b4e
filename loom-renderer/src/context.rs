//! Template contexts: serializable rendering payloads built from the ledger
//! and the project blueprint.

use serde::{Deserialize, Serialize};

use loom_core::layout::{AgentSpec, Blueprint, DocumentSpec, Layout};
use loom_core::ledger::Ledger;
use loom_core::types::EntityRef;

use crate::error::RenderError;

/// Project-wide payload shared by every template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    pub project: ProjectCtx,
    pub meta: MetaCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCtx {
    pub name: String,
    pub status_file: String,
    pub active_feature: Option<String>,
    pub documents: Vec<DocumentCtx>,
    pub agents: Vec<AgentCtx>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentCtx {
    pub title: String,
    pub path: String,
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCtx {
    pub name: String,
    pub role: String,
    pub responsibilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCtx {
    pub loom_version: String,
}

/// Payload for feature, epic and story documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityCtx {
    pub feature: String,
    pub epic: Option<String>,
    pub story: Option<String>,
    pub active: bool,
    pub status: Option<String>,
    /// Names of direct children (epics of a feature, stories of an epic).
    pub children: Vec<String>,
    pub tasks: Vec<TaskCtx>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCtx {
    pub id: String,
    pub description: String,
    pub done: bool,
}

impl From<&DocumentSpec> for DocumentCtx {
    fn from(d: &DocumentSpec) -> Self {
        DocumentCtx {
            title: d.title.clone(),
            path: Layout::Standard
                .docs_dir()
                .join(&d.file)
                .display()
                .to_string(),
            sections: d.sections.clone(),
        }
    }
}

impl From<&AgentSpec> for AgentCtx {
    fn from(a: &AgentSpec) -> Self {
        AgentCtx {
            name: a.name.clone(),
            role: a.role.clone(),
            responsibilities: a.responsibilities.clone(),
        }
    }
}

impl TemplateContext {
    pub fn new(ledger: &Ledger, blueprint: &Blueprint) -> Self {
        TemplateContext {
            project: ProjectCtx {
                name: ledger.project.name.clone(),
                status_file: Layout::Standard.status_file().display().to_string(),
                active_feature: ledger.active_features().next().map(|f| f.name.to_string()),
                documents: blueprint.documents.iter().map(DocumentCtx::from).collect(),
                agents: blueprint.agents.iter().map(AgentCtx::from).collect(),
            },
            meta: MetaCtx {
                loom_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::Context)
    }
}

impl EntityCtx {
    /// Describe `entity` from what the ledger knows about it. Untracked
    /// entities get an empty description.
    pub fn from_ledger(ledger: &Ledger, entity: &EntityRef) -> Self {
        match entity {
            EntityRef::Feature { feature } => {
                let f = ledger.feature(feature);
                EntityCtx {
                    feature: feature.to_string(),
                    active: f.is_some_and(|f| f.is_active),
                    children: f
                        .map(|f| f.epics.iter().map(|e| e.name.to_string()).collect())
                        .unwrap_or_default(),
                    ..EntityCtx::default()
                }
            }
            EntityRef::Epic { feature, epic } => EntityCtx {
                feature: feature.to_string(),
                epic: Some(epic.to_string()),
                children: ledger
                    .epic(feature, epic)
                    .map(|e| e.stories.iter().map(|s| s.id.to_string()).collect())
                    .unwrap_or_default(),
                ..EntityCtx::default()
            },
            EntityRef::Story {
                feature,
                epic,
                story,
            } => {
                let s = ledger.epic(feature, epic).and_then(|e| e.story(story));
                EntityCtx {
                    feature: feature.to_string(),
                    epic: Some(epic.to_string()),
                    story: Some(story.to_string()),
                    status: Some(s.map(|s| s.status).unwrap_or_default().to_string()),
                    tasks: s
                        .map(|s| {
                            s.review_tasks
                                .iter()
                                .chain(&s.tasks)
                                .map(|t| TaskCtx {
                                    id: t.id.to_string(),
                                    description: t.description.clone(),
                                    done: t.done,
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                    ..EntityCtx::default()
                }
            }
        }
    }
}
