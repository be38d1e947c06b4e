//! Reconcilers: apply the findings of one concern to the file tree.
//!
//! Every mutation is additive or amending. Files are created when missing
//! or blank, sections are appended, directories are created. State document
//! changes come back as [`LedgerEdit`]s for the orchestrator to apply; no
//! reconciler ever writes the state document itself.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use loom_core::layout::{entity_doc, missing_sections, INSTRUCTIONS_FILE, SETTINGS_FILE};
use loom_core::types::{EntityRef, FeatureName};
use loom_core::Model;
use loom_renderer::{Renderer, TemplateContext};

use crate::error::{worker_io, WorkerError};
use crate::finding::{Concern, Finding, FixAction, StateBlock, Target};
use crate::snapshot::Snapshot;
use crate::writer::{self, WriteResult};

// ---------------------------------------------------------------------------
// Change log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEntry {
    pub concern: Concern,
    pub target: Target,
    pub note: String,
}

/// What a reconciliation pass did, for the report and the progress check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeLog {
    pub created: Vec<ChangeEntry>,
    pub updated: Vec<ChangeEntry>,
    pub skipped: Vec<ChangeEntry>,
    pub failed: Vec<ChangeEntry>,
}

impl ChangeLog {
    /// No mutation happened. Skips and failures do not count.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn merge(&mut self, other: ChangeLog) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }

    pub(crate) fn fail(&mut self, concern: Concern, target: Target, note: impl Into<String>) {
        self.failed.push(ChangeEntry {
            concern,
            target,
            note: note.into(),
        });
    }

    fn skip(&mut self, concern: Concern, target: Target, note: impl Into<String>) {
        self.skipped.push(ChangeEntry {
            concern,
            target,
            note: note.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// Ledger edits
// ---------------------------------------------------------------------------

/// A state document change requested by a reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "edit", rename_all = "kebab-case")]
pub enum LedgerEdit {
    Track { entity: EntityRef },
    DeactivateAllBut { keep: Option<FeatureName> },
    ClearPosition,
    InsertBlock { block: StateBlock },
}

impl LedgerEdit {
    pub fn apply(&self, model: &mut Model) {
        match self {
            LedgerEdit::Track { entity } => {
                model.track(entity);
            }
            LedgerEdit::DeactivateAllBut { keep } => model.deactivate_all_but(keep.as_ref()),
            LedgerEdit::ClearPosition => model.clear_position(),
            LedgerEdit::InsertBlock { block: StateBlock::Aml } => {
                model.insert_aml_block();
            }
            LedgerEdit::InsertBlock { block: StateBlock::Yolo } => {
                model.insert_yolo_block();
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            LedgerEdit::Track { entity } => format!("track {} {entity}", entity.kind()),
            LedgerEdit::DeactivateAllBut { keep: Some(k) } => format!("keep only {k} active"),
            LedgerEdit::DeactivateAllBut { keep: None } => "deactivate all features".into(),
            LedgerEdit::ClearPosition => "clear current position".into(),
            LedgerEdit::InsertBlock { block: StateBlock::Aml } => "insert <aml> block".into(),
            LedgerEdit::InsertBlock { block: StateBlock::Yolo } => "insert <yolo> block".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciler contract
// ---------------------------------------------------------------------------

/// Shared, read-only inputs of one reconciling phase.
pub struct ReconcileContext {
    pub snapshot: Arc<Snapshot>,
    pub renderer: Arc<Renderer>,
    pub template: TemplateContext,
    pub allow_destructive: bool,
}

impl ReconcileContext {
    pub fn new(snapshot: Arc<Snapshot>, renderer: Arc<Renderer>, allow_destructive: bool) -> Self {
        let template = TemplateContext::new(snapshot.ledger(), &snapshot.blueprint);
        Self {
            snapshot,
            renderer,
            template,
            allow_destructive,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutput {
    pub changes: ChangeLog,
    pub edits: Vec<LedgerEdit>,
}

pub trait Reconciler: Send + Sync {
    fn concern(&self) -> Concern;

    /// Files this reconciler may write for `findings`, relative to the root.
    fn write_targets(&self, findings: &[Finding], snapshot: &Snapshot) -> BTreeSet<PathBuf> {
        findings
            .iter()
            .filter(|f| f.concern == self.concern())
            .filter_map(|f| f.fix.as_ref())
            .flat_map(|fix| action_targets(&fix.action, snapshot))
            .collect()
    }

    fn apply(&self, findings: &[Finding], ctx: &ReconcileContext) -> Result<ReconcileOutput, WorkerError>;
}

/// One reconciler per concern, in concern order.
pub fn standard() -> Vec<Arc<dyn Reconciler>> {
    vec![
        Arc::new(EntitiesReconciler),
        Arc::new(DocumentsReconciler),
        Arc::new(StructureReconciler),
        Arc::new(AgentsReconciler),
        Arc::new(ConfigurationReconciler),
    ]
}

fn action_targets(action: &FixAction, snapshot: &Snapshot) -> Vec<PathBuf> {
    match action {
        FixAction::CreateDirectory { path } => vec![path.clone()],
        FixAction::CreateDocument { doc } | FixAction::AppendSections { doc, .. } => {
            vec![snapshot.blueprint.document_path(doc)]
        }
        FixAction::CreateAgentFile { agent } => vec![agent.file()],
        FixAction::CreateInstructions => vec![PathBuf::from(INSTRUCTIONS_FILE)],
        FixAction::CreateSettings | FixAction::ReplaceSettings => vec![PathBuf::from(SETTINGS_FILE)],
        FixAction::CreateEntityDocument { entity } | FixAction::TrackEntity { entity } => {
            entity.lineage().iter().map(entity_doc).collect()
        }
        FixAction::InsertStateBlock { .. }
        | FixAction::DeactivateFeatures { .. }
        | FixAction::ClearPosition => Vec::new(),
    }
}

/// What applying one fix produced.
enum Step {
    Write(WriteResult),
    Edit(LedgerEdit),
    Unsupported,
}

/// Run `act` for every fixable finding of `concern`, recording outcomes.
fn drive<F>(concern: Concern, findings: &[Finding], ctx: &ReconcileContext, mut act: F) -> ReconcileOutput
where
    F: FnMut(&FixAction) -> Result<Vec<Step>, WorkerError>,
{
    let mut out = ReconcileOutput::default();
    for finding in findings.iter().filter(|f| f.concern == concern) {
        let Some(fix) = &finding.fix else {
            out.changes
                .skip(concern, finding.target.clone(), "no automatic fix");
            continue;
        };
        if fix.destructive && !ctx.allow_destructive {
            tracing::debug!(finding = %finding.target, "destructive fix not confirmed");
            out.changes.skip(
                concern,
                finding.target.clone(),
                "destructive fix requires --allow-destructive",
            );
            continue;
        }
        match act(&fix.action) {
            Ok(steps) => {
                for step in steps {
                    record(&mut out, concern, finding, step, &ctx.snapshot.root);
                }
            }
            Err(err) => {
                tracing::warn!(%concern, finding = %finding.target, "fix failed: {err}");
                out.changes
                    .fail(concern, finding.target.clone(), err.to_string());
            }
        }
    }
    out
}

fn record(out: &mut ReconcileOutput, concern: Concern, finding: &Finding, step: Step, root: &Path) {
    let rel = |p: &Path| Target::Path(p.strip_prefix(root).unwrap_or(p).to_path_buf());
    match step {
        Step::Write(WriteResult::Created { path }) => out.changes.created.push(ChangeEntry {
            concern,
            target: rel(&path),
            note: "created".into(),
        }),
        Step::Write(WriteResult::Updated { path }) => out.changes.updated.push(ChangeEntry {
            concern,
            target: rel(&path),
            note: finding.description.clone(),
        }),
        Step::Write(WriteResult::Unchanged { path }) => {
            out.changes.skip(concern, rel(&path), "already up to date")
        }
        Step::Edit(edit) => out.edits.push(edit),
        Step::Unsupported => out.changes.skip(
            concern,
            finding.target.clone(),
            format!("not handled by the {concern} reconciler"),
        ),
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

pub struct EntitiesReconciler;

impl EntitiesReconciler {
    fn write_entity_doc(ctx: &ReconcileContext, entity: &EntityRef) -> Result<Step, WorkerError> {
        let (rel, content) = ctx
            .renderer
            .render_entity(&ctx.template, ctx.snapshot.ledger(), entity)?;
        Ok(Step::Write(writer::write_if_absent(
            &ctx.snapshot.absolute(&rel),
            &content,
        )?))
    }
}

impl Reconciler for EntitiesReconciler {
    fn concern(&self) -> Concern {
        Concern::Entities
    }

    fn apply(&self, findings: &[Finding], ctx: &ReconcileContext) -> Result<ReconcileOutput, WorkerError> {
        Ok(drive(self.concern(), findings, ctx, |action| match action {
            FixAction::CreateEntityDocument { entity } => {
                Ok(vec![Self::write_entity_doc(ctx, entity)?])
            }
            FixAction::TrackEntity { entity } => {
                let mut steps = vec![Step::Edit(LedgerEdit::Track {
                    entity: entity.clone(),
                })];
                // Parents tracked alongside need their own documents.
                for parent in entity.lineage().iter().filter(|p| *p != entity) {
                    steps.push(Self::write_entity_doc(ctx, parent)?);
                }
                Ok(steps)
            }
            FixAction::DeactivateFeatures { keep } => Ok(vec![Step::Edit(
                LedgerEdit::DeactivateAllBut { keep: keep.clone() },
            )]),
            FixAction::ClearPosition => Ok(vec![Step::Edit(LedgerEdit::ClearPosition)]),
            _ => Ok(vec![Step::Unsupported]),
        }))
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

pub struct DocumentsReconciler;

impl Reconciler for DocumentsReconciler {
    fn concern(&self) -> Concern {
        Concern::Documents
    }

    fn apply(&self, findings: &[Finding], ctx: &ReconcileContext) -> Result<ReconcileOutput, WorkerError> {
        Ok(drive(self.concern(), findings, ctx, |action| match action {
            FixAction::CreateDocument { doc } => {
                let path = ctx.snapshot.absolute(&ctx.snapshot.blueprint.document_path(doc));
                let content = ctx.renderer.render_document(&ctx.template, doc)?;
                Ok(vec![Step::Write(writer::write_if_absent(&path, &content)?)])
            }
            FixAction::AppendSections { doc, .. } => {
                let path = ctx.snapshot.absolute(&ctx.snapshot.blueprint.document_path(doc));
                // Re-read so a repeated plan appends nothing.
                let body = fs::read_to_string(&path).map_err(|e| worker_io(&path, e))?;
                let missing = missing_sections(doc, &body);
                if missing.is_empty() {
                    return Ok(vec![Step::Write(WriteResult::Unchanged { path })]);
                }
                let addition = ctx.renderer.render_sections(&missing)?;
                Ok(vec![Step::Write(writer::append(&path, &addition)?)])
            }
            _ => Ok(vec![Step::Unsupported]),
        }))
    }
}

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

pub struct StructureReconciler;

impl Reconciler for StructureReconciler {
    fn concern(&self) -> Concern {
        Concern::Structure
    }

    fn apply(&self, findings: &[Finding], ctx: &ReconcileContext) -> Result<ReconcileOutput, WorkerError> {
        Ok(drive(self.concern(), findings, ctx, |action| match action {
            FixAction::CreateDirectory { path } => Ok(vec![Step::Write(writer::ensure_dir(
                &ctx.snapshot.absolute(path),
            )?)]),
            _ => Ok(vec![Step::Unsupported]),
        }))
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

pub struct AgentsReconciler;

impl Reconciler for AgentsReconciler {
    fn concern(&self) -> Concern {
        Concern::Agents
    }

    fn apply(&self, findings: &[Finding], ctx: &ReconcileContext) -> Result<ReconcileOutput, WorkerError> {
        Ok(drive(self.concern(), findings, ctx, |action| match action {
            FixAction::CreateAgentFile { agent } => {
                let content = ctx.renderer.render_agent(&ctx.template, agent)?;
                let path = ctx.snapshot.absolute(&agent.file());
                Ok(vec![Step::Write(writer::write_if_absent(&path, &content)?)])
            }
            _ => Ok(vec![Step::Unsupported]),
        }))
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub struct ConfigurationReconciler;

impl Reconciler for ConfigurationReconciler {
    fn concern(&self) -> Concern {
        Concern::Configuration
    }

    fn apply(&self, findings: &[Finding], ctx: &ReconcileContext) -> Result<ReconcileOutput, WorkerError> {
        Ok(drive(self.concern(), findings, ctx, |action| match action {
            FixAction::CreateInstructions => {
                let (rel, content) = ctx.renderer.render_instructions(&ctx.template)?;
                let path = ctx.snapshot.absolute(&rel);
                Ok(vec![Step::Write(writer::write_if_absent(&path, &content)?)])
            }
            FixAction::CreateSettings => {
                let (rel, content) = ctx.renderer.render_settings(&ctx.template)?;
                let path = ctx.snapshot.absolute(&rel);
                Ok(vec![Step::Write(writer::write_if_absent(&path, &content)?)])
            }
            FixAction::ReplaceSettings => {
                let (rel, content) = ctx.renderer.render_settings(&ctx.template)?;
                let path = ctx.snapshot.absolute(&rel);
                Ok(vec![Step::Write(writer::atomic_write(&path, &content)?)])
            }
            FixAction::InsertStateBlock { block } => {
                Ok(vec![Step::Edit(LedgerEdit::InsertBlock { block: *block })])
            }
            _ => Ok(vec![Step::Unsupported]),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::synthesize;
    use crate::validators;
    use loom_core::{Blueprint, Ledger};
    use tempfile::TempDir;

    fn context(dir: &TempDir, allow_destructive: bool) -> ReconcileContext {
        let snap = Snapshot::capture(dir.path(), Ledger::new("demo"), Blueprint::standard())
            .expect("snapshot");
        ReconcileContext::new(
            Arc::new(snap),
            Arc::new(Renderer::new().expect("renderer")),
            allow_destructive,
        )
    }

    fn findings(ctx: &ReconcileContext) -> Vec<Finding> {
        let reports = validators::standard()
            .iter()
            .map(|v| v.validate(&ctx.snapshot).expect("validate"))
            .collect::<Vec<_>>();
        synthesize(reports).findings().cloned().collect()
    }

    fn apply_all(findings: &[Finding], ctx: &ReconcileContext) -> ReconcileOutput {
        let mut out = ReconcileOutput::default();
        for r in standard() {
            let o = r.apply(findings, ctx).expect("apply");
            out.changes.merge(o.changes);
            out.edits.extend(o.edits);
        }
        out
    }

    #[test]
    fn second_application_of_the_same_plan_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, false);
        let plan = findings(&ctx);

        let first = apply_all(&plan, &ctx);
        assert!(!first.changes.is_empty());
        assert!(!first.changes.has_failures(), "{:#?}", first.changes.failed);

        let second = apply_all(&plan, &ctx);
        assert!(second.changes.is_empty(), "{:#?}", second.changes);
        assert!(!second.changes.skipped.is_empty());
    }

    #[test]
    fn existing_content_is_never_replaced() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/PRD.md"), "# Mine\n\nkeep me\n").unwrap();
        let ctx = context(&dir, false);
        apply_all(&findings(&ctx), &ctx);

        let prd = fs::read_to_string(dir.path().join("docs/PRD.md")).unwrap();
        assert!(prd.starts_with("# Mine\n\nkeep me\n"));
        assert!(prd.contains("## Problem Statement"));
    }

    #[test]
    fn destructive_settings_fix_needs_confirmation() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".claude")).unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), "{ broken").unwrap();

        let ctx = context(&dir, false);
        let plan = findings(&ctx);
        let out = ConfigurationReconciler.apply(&plan, &ctx).unwrap();
        assert!(out
            .changes
            .skipped
            .iter()
            .any(|e| e.note.contains("--allow-destructive")));
        assert_eq!(
            fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap(),
            "{ broken"
        );

        let ctx = context(&dir, true);
        let out = ConfigurationReconciler.apply(&plan, &ctx).unwrap();
        assert_eq!(out.changes.updated.len(), 1);
        let body = fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&body).is_ok());
    }

    #[test]
    fn state_fixes_become_ledger_edits() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, false);
        let out = ConfigurationReconciler.apply(&findings(&ctx), &ctx).unwrap();
        assert_eq!(
            out.edits,
            vec![
                LedgerEdit::InsertBlock { block: StateBlock::Aml },
                LedgerEdit::InsertBlock { block: StateBlock::Yolo },
            ]
        );
        let mut model = Model::new(Ledger::new("demo"));
        for e in &out.edits {
            e.apply(&mut model);
        }
        assert!(model.ledger().aml.is_some());
        assert!(model.ledger().yolo.is_some());
    }

    #[test]
    fn write_targets_follow_the_concern() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, false);
        let plan = findings(&ctx);
        let docs = DocumentsReconciler.write_targets(&plan, &ctx.snapshot);
        assert_eq!(docs.len(), 12);
        assert!(docs.contains(Path::new("docs/PRD.md")));
        let agents = AgentsReconciler.write_targets(&plan, &ctx.snapshot);
        assert!(docs.is_disjoint(&agents));
    }
}
