//! Typed view of the state document: the project's features, epics, stories
//! and tasks plus the workflow position and optional mode blocks.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::InvariantViolation;
use crate::types::{
    CommitId, EntityRef, EpicName, FeatureName, StoryId, StoryRef, StoryStatus, TaskId,
    TaskOrigin,
};

/// Breakpoints seeded into a freshly enabled YOLO block.
pub const DEFAULT_BREAKPOINTS: &[&str] = &[
    "after-planning",
    "before-development",
    "after-development",
    "before-code-review",
    "after-code-review",
    "before-commit",
    "after-commit",
    "before-next-story",
];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Ledger {
    pub project: ProjectMeta,
    pub aml: Option<AmlBlock>,
    pub yolo: Option<YoloBlock>,
    pub position: Position,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProjectMeta {
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Agent memory layer switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmlBlock {
    pub enabled: bool,
}

/// Autonomous mode with named stopping points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YoloBlock {
    pub enabled: bool,
    pub breakpoints: Vec<Breakpoint>,
}

impl Default for YoloBlock {
    fn default() -> Self {
        Self {
            enabled: false,
            breakpoints: DEFAULT_BREAKPOINTS
                .iter()
                .map(|n| Breakpoint {
                    name: (*n).to_owned(),
                    enabled: true,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub name: String,
    pub enabled: bool,
}

/// The current workflow position.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Position {
    pub feature: Option<FeatureName>,
    pub epic: Option<EpicName>,
    pub story: Option<StoryId>,
    pub task: Option<TaskId>,
}

impl Position {
    pub fn is_empty(&self) -> bool {
        self.feature.is_none() && self.epic.is_none() && self.story.is_none() && self.task.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feature {
    pub name: FeatureName,
    pub is_active: bool,
    pub epics: Vec<Epic>,
}

impl Feature {
    pub fn new(name: FeatureName) -> Self {
        Self {
            name,
            is_active: false,
            epics: Vec::new(),
        }
    }

    pub fn epic(&self, name: &EpicName) -> Option<&Epic> {
        self.epics.iter().find(|e| &e.name == name)
    }

    pub fn epic_mut(&mut self, name: &EpicName) -> Option<&mut Epic> {
        self.epics.iter_mut().find(|e| &e.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Epic {
    pub name: EpicName,
    pub stories: Vec<Story>,
}

impl Epic {
    pub fn new(name: EpicName) -> Self {
        Self {
            name,
            stories: Vec::new(),
        }
    }

    /// An epic is complete when it has at least one story and every story is
    /// done. An empty epic is incomplete.
    pub fn is_complete(&self) -> bool {
        !self.stories.is_empty() && self.stories.iter().all(|s| s.status == StoryStatus::Done)
    }

    pub fn story(&self, id: &StoryId) -> Option<&Story> {
        self.stories.iter().find(|s| &s.id == id)
    }

    pub fn story_mut(&mut self, id: &StoryId) -> Option<&mut Story> {
        self.stories.iter_mut().find(|s| &s.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Story {
    pub id: StoryId,
    pub status: StoryStatus,
    /// Outstanding review work, newest batch first.
    pub review_tasks: Vec<Task>,
    pub tasks: Vec<Task>,
}

impl Story {
    pub fn new(id: StoryId) -> Self {
        Self {
            id,
            status: StoryStatus::NotStarted,
            review_tasks: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn open_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| !t.done).count()
    }

    pub fn has_open_work(&self) -> bool {
        self.open_tasks() > 0 || !self.review_tasks.is_empty()
    }

    pub fn has_task(&self, id: &str) -> bool {
        self.tasks
            .iter()
            .chain(&self.review_tasks)
            .any(|t| t.id.as_str() == id)
    }

    /// The task to work on next: pending review work first, then the first
    /// incomplete ordinary task.
    pub fn next_task(&self) -> Option<&Task> {
        self.review_tasks
            .first()
            .or_else(|| self.tasks.iter().find(|t| !t.done))
    }

    /// Lifecycle check shared by every status change.
    ///
    /// Forward moves are allowed; the only backward move is the review
    /// re-open into `InProgress`. `Done` requires all work to be finished.
    pub fn check_transition(&self, to: StoryStatus) -> Result<(), InvariantViolation> {
        let from = self.status;
        let reopen = to == StoryStatus::InProgress
            && matches!(from, StoryStatus::WaitingForReview | StoryStatus::Done);
        if to < from && !reopen {
            return Err(InvariantViolation::IllegalTransition {
                story: self.id.to_string(),
                from,
                to,
            });
        }
        if to == StoryStatus::Done && self.has_open_work() {
            return Err(InvariantViolation::OpenWork {
                story: self.id.to_string(),
                open_tasks: self.open_tasks(),
                review_tasks: self.review_tasks.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub done: bool,
    pub commit: Option<CommitId>,
    pub origin: TaskOrigin,
}

impl Task {
    pub fn new(id: TaskId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            done: false,
            commit: None,
            origin: TaskOrigin::Planned,
        }
    }
}

impl Ledger {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: ProjectMeta {
                name: project.into(),
                last_modified: None,
            },
            ..Self::default()
        }
    }

    pub fn feature(&self, name: &FeatureName) -> Option<&Feature> {
        self.features.iter().find(|f| &f.name == name)
    }

    pub fn feature_mut(&mut self, name: &FeatureName) -> Option<&mut Feature> {
        self.features.iter_mut().find(|f| &f.name == name)
    }

    pub fn epic(&self, feature: &FeatureName, epic: &EpicName) -> Option<&Epic> {
        self.feature(feature)?.epic(epic)
    }

    pub fn story(&self, r: &StoryRef) -> Option<&Story> {
        self.epic(&r.feature, &r.epic)?.story(&r.story)
    }

    pub fn story_mut(&mut self, r: &StoryRef) -> Option<&mut Story> {
        self.feature_mut(&r.feature)?
            .epic_mut(&r.epic)?
            .story_mut(&r.story)
    }

    pub fn active_features(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter().filter(|f| f.is_active)
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        match entity {
            EntityRef::Feature { feature } => self.feature(feature).is_some(),
            EntityRef::Epic { feature, epic } => self.epic(feature, epic).is_some(),
            EntityRef::Story {
                feature,
                epic,
                story,
            } => self
                .epic(feature, epic)
                .is_some_and(|e| e.story(story).is_some()),
        }
    }

    /// Every tracked entity, parents before children, in document order.
    pub fn entities(&self) -> Vec<EntityRef> {
        let mut out = Vec::new();
        for f in &self.features {
            out.push(EntityRef::Feature {
                feature: f.name.clone(),
            });
            for e in &f.epics {
                out.push(EntityRef::Epic {
                    feature: f.name.clone(),
                    epic: e.name.clone(),
                });
                for s in &e.stories {
                    out.push(EntityRef::Story {
                        feature: f.name.clone(),
                        epic: e.name.clone(),
                        story: s.id.clone(),
                    });
                }
            }
        }
        out
    }

    /// All stories with their fully-qualified reference.
    pub fn stories(&self) -> impl Iterator<Item = (StoryRef, &Story)> {
        self.features.iter().flat_map(|f| {
            f.epics.iter().flat_map(move |e| {
                e.stories.iter().map(move |s| {
                    (
                        StoryRef::new(f.name.clone(), e.name.clone(), s.id.clone()),
                        s,
                    )
                })
            })
        })
    }

    /// Rule violations present in the ledger as loaded. Hand edits can
    /// introduce these; mutations through the hierarchy model cannot.
    pub fn violations(&self) -> Vec<InvariantViolation> {
        let mut out = Vec::new();

        let active: Vec<String> = self.active_features().map(|f| f.name.to_string()).collect();
        if active.len() > 1 {
            out.push(InvariantViolation::MultipleActiveFeatures { features: active });
        }

        for (r, story) in self.stories() {
            if story.status == StoryStatus::Done && story.has_open_work() {
                out.push(InvariantViolation::OpenWork {
                    story: r.to_string(),
                    open_tasks: story.open_tasks(),
                    review_tasks: story.review_tasks.len(),
                });
            }
        }

        if let Some(missing) = self.dangling_position() {
            out.push(missing);
        }
        out
    }

    /// The first position component that names something not in the ledger.
    pub fn dangling_position(&self) -> Option<InvariantViolation> {
        let p = &self.position;
        let not_found = |kind: &'static str, name: String| {
            Some(InvariantViolation::NotFound { kind, name })
        };
        let Some(fname) = &p.feature else {
            return None;
        };
        let Some(feature) = self.feature(fname) else {
            return not_found("feature", fname.to_string());
        };
        let Some(ename) = &p.epic else {
            return None;
        };
        let Some(epic) = feature.epic(ename) else {
            return not_found("epic", format!("{fname}/{ename}"));
        };
        let Some(sid) = &p.story else {
            return None;
        };
        let Some(story) = epic.story(sid) else {
            return not_found("story", format!("{fname}/{ename}/{sid}"));
        };
        match &p.task {
            Some(tid) if !story.has_task(tid.as_str()) => {
                not_found("task", format!("{fname}/{ename}/{sid}#{tid}"))
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
