//! Project initialisation and entity scaffolding.
//!
//! [`init`] writes a fresh state document; the rest of the skeleton is left
//! to a reconciliation run. [`Workspace`] wraps one load/mutate/save cycle of
//! the hierarchy model and writes the document of every entity it creates.

use std::path::{Path, PathBuf};

use loom_core::layout::{entity_doc, status_path, Layout};
use loom_core::ledger::{AmlBlock, YoloBlock};
use loom_core::types::{EntityRef, EpicName, FeatureName, StoryRef};
use loom_core::{store, Blueprint, EngineConfig, Ledger, Model, StateStore, StatusDocument};
use loom_renderer::{Renderer, TemplateContext};

use crate::error::EngineError;
use crate::writer::{self, WriteResult};

/// Create `<root>/.loom/status.xml` for a new project named `project`.
///
/// Refuses to touch a project that already has a state document in either
/// layout. Recovery of a damaged document goes through `restore`.
pub fn init(root: &Path, project: &str) -> Result<PathBuf, EngineError> {
    for layout in [Layout::Standard, Layout::Flat] {
        let existing = root.join(layout.status_file());
        if existing.exists() {
            return Err(EngineError::AlreadyInitialized { path: existing });
        }
    }

    let mut ledger = Ledger::new(project);
    ledger.aml = Some(AmlBlock { enabled: false });
    ledger.yolo = Some(YoloBlock::default());

    let path = status_path(root);
    let mut doc = StatusDocument::from_ledger(ledger);
    store::save(&mut doc, &path)?;
    tracing::info!(path = %path.display(), project, "initialised state document");
    Ok(path)
}

/// Default project name: the last component of `root`.
pub fn default_project_name(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(root)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_owned())
}

/// One editing session over a project's ledger.
pub struct Workspace {
    root: PathBuf,
    store: StateStore,
    doc: StatusDocument,
    model: Model,
    renderer: Renderer,
    blueprint: Blueprint,
    created: Vec<EntityRef>,
}

impl Workspace {
    pub fn open(root: &Path) -> Result<Self, EngineError> {
        let config = EngineConfig::load_at(root)?;
        let store = StateStore::new(status_path(root)).with_retention(config.backup_retention);
        let doc = store.load()?;
        let model = Model::new(doc.ledger().clone());
        Ok(Self {
            root: root.to_path_buf(),
            store,
            doc,
            model,
            renderer: Renderer::for_project(root)?,
            blueprint: config.blueprint(),
            created: Vec::new(),
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn create_feature(&mut self, name: &FeatureName) -> Result<PathBuf, EngineError> {
        self.model.create_feature(name)?;
        Ok(self.created(EntityRef::Feature {
            feature: name.clone(),
        }))
    }

    pub fn create_epic(&mut self, feature: &FeatureName, epic: &EpicName) -> Result<PathBuf, EngineError> {
        self.model.create_epic(feature, epic)?;
        Ok(self.created(EntityRef::Epic {
            feature: feature.clone(),
            epic: epic.clone(),
        }))
    }

    pub fn create_story(&mut self, r: &StoryRef, tasks: &[String]) -> Result<PathBuf, EngineError> {
        self.model.create_story(r, tasks)?;
        Ok(self.created(r.clone().into()))
    }

    fn created(&mut self, entity: EntityRef) -> PathBuf {
        let rel = entity_doc(&entity);
        self.created.push(entity);
        rel
    }

    /// Save the ledger if it changed, then write documents for entities
    /// created in this session. Existing documents are kept.
    pub fn commit(mut self) -> Result<Vec<WriteResult>, EngineError> {
        let ledger = self.model.into_ledger();
        if &ledger != self.doc.ledger() {
            self.doc.set_ledger(ledger);
            self.store.save(&mut self.doc)?;
        }

        let ctx = TemplateContext::new(self.doc.ledger(), &self.blueprint);
        let mut written = Vec::with_capacity(self.created.len());
        for entity in &self.created {
            let (rel, content) = self.renderer.render_entity(&ctx, self.doc.ledger(), entity)?;
            written.push(writer::write_if_absent(&self.root.join(rel), &content)?);
        }
        Ok(written)
    }
}
