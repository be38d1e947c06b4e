//! Hierarchy model: the ledger plus its relationship to the file tree, and the
//! only place ledger mutations are performed.
//!
//! Every operation validates first and mutates second, so an
//! [`InvariantViolation`] always leaves the ledger unchanged.

use std::collections::BTreeSet;

use crate::error::InvariantViolation;
use crate::ledger::{AmlBlock, Epic, Feature, Ledger, Position, Story, Task, YoloBlock};
use crate::tree::FileTree;
use crate::types::{
    CommitId, EntityRef, EpicName, FeatureName, StoryRef, StoryStatus, TaskId, TaskOrigin,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    ledger: Ledger,
    /// Tracked in the ledger but without a document on disk.
    orphaned: Vec<EntityRef>,
    /// Present on disk but not tracked in the ledger.
    untracked: Vec<EntityRef>,
    /// Entity-shaped paths whose names are invalid.
    invalid_paths: Vec<String>,
}

fn not_found(kind: &'static str, name: impl ToString) -> InvariantViolation {
    InvariantViolation::NotFound {
        kind,
        name: name.to_string(),
    }
}

impl Model {
    /// Model without a file tree comparison.
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            orphaned: Vec::new(),
            untracked: Vec::new(),
            invalid_paths: Vec::new(),
        }
    }

    /// Resolve the ledger against `tree`, linear in ledger size plus tree size.
    pub fn build(ledger: Ledger, tree: &FileTree) -> Self {
        let (on_disk, invalid_paths) = tree.entity_documents();
        let on_disk: BTreeSet<EntityRef> = on_disk.into_iter().collect();
        let tracked = ledger.entities();
        let tracked_set: BTreeSet<&EntityRef> = tracked.iter().collect();

        let orphaned = tracked
            .iter()
            .filter(|e| !on_disk.contains(*e))
            .cloned()
            .collect();
        let untracked = on_disk
            .iter()
            .filter(|e| !tracked_set.contains(e))
            .cloned()
            .collect();

        Self {
            ledger,
            orphaned,
            untracked,
            invalid_paths,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    pub fn orphaned(&self) -> &[EntityRef] {
        &self.orphaned
    }

    pub fn untracked(&self) -> &[EntityRef] {
        &self.untracked
    }

    pub fn invalid_paths(&self) -> &[String] {
        &self.invalid_paths
    }

    pub fn is_epic_complete(
        &self,
        feature: &FeatureName,
        epic: &EpicName,
    ) -> Result<bool, InvariantViolation> {
        self.ledger
            .epic(feature, epic)
            .map(Epic::is_complete)
            .ok_or_else(|| not_found("epic", format!("{feature}/{epic}")))
    }

    fn story(&self, r: &StoryRef) -> Result<&Story, InvariantViolation> {
        self.ledger.story(r).ok_or_else(|| not_found("story", r))
    }

    fn story_mut(&mut self, r: &StoryRef) -> Result<&mut Story, InvariantViolation> {
        self.ledger.story_mut(r).ok_or_else(|| not_found("story", r))
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    pub fn create_feature(&mut self, name: &FeatureName) -> Result<(), InvariantViolation> {
        if self.ledger.feature(name).is_some() {
            return Err(InvariantViolation::AlreadyExists {
                kind: "feature",
                name: name.to_string(),
            });
        }
        self.ledger.features.push(Feature::new(name.clone()));
        Ok(())
    }

    pub fn create_epic(
        &mut self,
        feature: &FeatureName,
        epic: &EpicName,
    ) -> Result<(), InvariantViolation> {
        let f = self
            .ledger
            .feature_mut(feature)
            .ok_or_else(|| not_found("feature", feature))?;
        if f.epic(epic).is_some() {
            return Err(InvariantViolation::AlreadyExists {
                kind: "epic",
                name: format!("{feature}/{epic}"),
            });
        }
        f.epics.push(Epic::new(epic.clone()));
        Ok(())
    }

    /// Create a story with ordinary tasks numbered from 1.
    pub fn create_story(
        &mut self,
        r: &StoryRef,
        tasks: &[String],
    ) -> Result<(), InvariantViolation> {
        let epic = self
            .ledger
            .feature_mut(&r.feature)
            .ok_or_else(|| not_found("feature", &r.feature))?
            .epic_mut(&r.epic)
            .ok_or_else(|| not_found("epic", format!("{}/{}", r.feature, r.epic)))?;
        if epic.story(&r.story).is_some() {
            return Err(InvariantViolation::AlreadyExists {
                kind: "story",
                name: r.to_string(),
            });
        }
        let mut story = Story::new(r.story.clone());
        for desc in tasks {
            let id = next_id(&story, "");
            story.tasks.push(Task::new(id, desc.clone()));
        }
        epic.stories.push(story);
        Ok(())
    }

    /// Append an ordinary task. A story past development re-opens.
    pub fn add_task(
        &mut self,
        r: &StoryRef,
        description: &str,
    ) -> Result<TaskId, InvariantViolation> {
        let story = self.story_mut(r)?;
        if story.status > StoryStatus::InProgress {
            story.check_transition(StoryStatus::InProgress)?;
            story.status = StoryStatus::InProgress;
        }
        let id = next_id(story, "");
        story.tasks.push(Task::new(id.clone(), description));
        Ok(id)
    }

    /// Ensure `entity` and its parents are tracked. Returns whether anything
    /// was added.
    pub fn track(&mut self, entity: &EntityRef) -> bool {
        let mut added = false;
        for e in entity.lineage() {
            if self.ledger.contains(&e) {
                continue;
            }
            let result = match &e {
                EntityRef::Feature { feature } => self.create_feature(feature),
                EntityRef::Epic { feature, epic } => self.create_epic(feature, epic),
                EntityRef::Story {
                    feature,
                    epic,
                    story,
                } => self.create_story(
                    &StoryRef::new(feature.clone(), epic.clone(), story.clone()),
                    &[],
                ),
            };
            added |= result.is_ok();
        }
        self.untracked.retain(|u| u != entity);
        added
    }

    // -----------------------------------------------------------------------
    // Workflow
    // -----------------------------------------------------------------------

    /// Make `name` the single active feature and move the position to it.
    pub fn activate_feature(&mut self, name: &FeatureName) -> Result<(), InvariantViolation> {
        if self.ledger.feature(name).is_none() {
            return Err(not_found("feature", name));
        }
        for f in &mut self.ledger.features {
            f.is_active = &f.name == name;
        }
        if self.ledger.position.feature.as_ref() != Some(name) {
            self.ledger.position = Position {
                feature: Some(name.clone()),
                ..Position::default()
            };
        }
        Ok(())
    }

    /// Deactivate every feature except `keep`.
    pub fn deactivate_all_but(&mut self, keep: Option<&FeatureName>) {
        for f in &mut self.ledger.features {
            f.is_active = keep == Some(&f.name);
        }
    }

    pub fn clear_position(&mut self) {
        self.ledger.position = Position::default();
    }

    /// Insert a disabled AML block if the ledger has none.
    pub fn insert_aml_block(&mut self) -> bool {
        if self.ledger.aml.is_some() {
            return false;
        }
        self.ledger.aml = Some(AmlBlock { enabled: false });
        true
    }

    /// Insert a disabled YOLO block with the default breakpoints if the
    /// ledger has none.
    pub fn insert_yolo_block(&mut self) -> bool {
        if self.ledger.yolo.is_some() {
            return false;
        }
        self.ledger.yolo = Some(YoloBlock::default());
        true
    }

    pub fn start_story(&mut self, r: &StoryRef) -> Result<(), InvariantViolation> {
        let story = self.story(r)?;
        if story.status != StoryStatus::InProgress {
            if story.status != StoryStatus::NotStarted {
                return Err(InvariantViolation::IllegalTransition {
                    story: r.to_string(),
                    from: story.status,
                    to: StoryStatus::InProgress,
                });
            }
            self.story_mut(r)?.status = StoryStatus::InProgress;
        }
        self.point_at(r);
        Ok(())
    }

    /// Mark a task complete. Consumes a review task if `task` names one.
    ///
    /// Returns the story's resulting status: it moves to in-progress when it
    /// had not started, and to waiting-for-review once no open work remains.
    pub fn advance_task(
        &mut self,
        r: &StoryRef,
        task: &TaskId,
        commit: Option<CommitId>,
    ) -> Result<StoryStatus, InvariantViolation> {
        let story = self.story(r)?;
        let in_review = story.review_tasks.iter().position(|t| &t.id == task);
        if in_review.is_none() {
            match story.tasks.iter().find(|t| &t.id == task) {
                None => return Err(not_found("task", format!("{r}#{task}"))),
                Some(t) if t.done => {
                    return Err(InvariantViolation::TaskAlreadyComplete {
                        story: r.to_string(),
                        task: task.to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        let story = self.story_mut(r)?;
        match in_review {
            Some(i) => {
                let mut t = story.review_tasks.remove(i);
                t.done = true;
                t.commit = commit;
                t.origin = TaskOrigin::Review;
                story.tasks.push(t);
            }
            None => {
                if let Some(t) = story.tasks.iter_mut().find(|t| &t.id == task) {
                    t.done = true;
                    t.commit = commit;
                }
            }
        }
        if story.status == StoryStatus::NotStarted {
            story.status = StoryStatus::InProgress;
        }
        if !story.has_open_work() && story.status < StoryStatus::WaitingForReview {
            story.status = StoryStatus::WaitingForReview;
        }
        let status = story.status;
        self.point_at(r);
        Ok(status)
    }

    /// Prepend a batch of review tasks and re-open the story.
    pub fn inject_review_tasks(
        &mut self,
        r: &StoryRef,
        descriptions: &[String],
    ) -> Result<Vec<TaskId>, InvariantViolation> {
        let story = self.story(r)?;
        if descriptions.is_empty() {
            return Err(InvariantViolation::EmptyReview {
                story: r.to_string(),
            });
        }
        if story.status < StoryStatus::WaitingForReview {
            return Err(InvariantViolation::ReviewNotAllowed {
                story: r.to_string(),
                status: story.status,
            });
        }
        story.check_transition(StoryStatus::InProgress)?;

        let story = self.story_mut(r)?;
        let mut batch = Vec::with_capacity(descriptions.len());
        let mut probe = story.clone();
        for desc in descriptions {
            let id = next_id(&probe, "r");
            let mut t = Task::new(id, desc.clone());
            t.origin = TaskOrigin::Review;
            probe.review_tasks.push(t.clone());
            batch.push(t);
        }
        let ids = batch.iter().map(|t| t.id.clone()).collect();
        batch.append(&mut story.review_tasks);
        story.review_tasks = batch;
        story.status = StoryStatus::InProgress;
        self.point_at(r);
        Ok(ids)
    }

    /// Move a story to done; rejected while any work is open.
    pub fn close_story(&mut self, r: &StoryRef) -> Result<(), InvariantViolation> {
        let story = self.story(r)?;
        story.check_transition(StoryStatus::Done)?;
        self.story_mut(r)?.status = StoryStatus::Done;
        if self.ledger.position.story.as_ref() == Some(&r.story)
            && self.ledger.position.epic.as_ref() == Some(&r.epic)
        {
            self.ledger.position.task = None;
        }
        Ok(())
    }

    fn point_at(&mut self, r: &StoryRef) {
        let next = self
            .ledger
            .story(r)
            .and_then(Story::next_task)
            .map(|t| t.id.clone());
        self.ledger.position = Position {
            feature: Some(r.feature.clone()),
            epic: Some(r.epic.clone()),
            story: Some(r.story.clone()),
            task: next,
        };
    }
}

/// Smallest unused `<prefix><n>` id in `story`, starting at 1.
fn next_id(story: &Story, prefix: &str) -> TaskId {
    let mut n: usize = 1;
    loop {
        let candidate = format!("{prefix}{n}");
        if !story.has_task(&candidate) {
            if let Ok(id) = TaskId::new(candidate) {
                return id;
            }
        }
        n += 1;
    }
}
