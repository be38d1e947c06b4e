//! End-to-end runs of the reconciliation pipeline against temp projects.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use loom_core::layout::{status_path, Layout};
use loom_core::types::{FeatureName, StoryRef};
use loom_core::{store, Ledger, StatusDocument};
use loom_reconcile::reconcilers::{self, ReconcileContext, ReconcileOutput};
use loom_reconcile::validators;
use loom_reconcile::{
    migrate, scaffold, AbortReason, Approval, AutoApprove, CancelFlag, ChangeEntry, Concern, Finding,
    Orchestrator, Outcome, Reconciler, RemediationPlan, RunOptions, Severity, Snapshot, Target, Validator,
    WorkerError,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn scaffolded() -> TempDir {
    let dir = TempDir::new().unwrap();
    scaffold::init(dir.path(), "demo").unwrap();
    let report = Orchestrator::open(dir.path())
        .unwrap()
        .run(&mut AutoApprove)
        .await
        .unwrap();
    assert!(report.is_converged(), "scaffold did not converge: {:?}", report.outcome);
    dir
}

fn residual(outcome: &Outcome) -> &RemediationPlan {
    match outcome {
        Outcome::Aborted { residual, .. } => residual,
        other => panic!("expected abort, got {other:?}"),
    }
}

struct Panicking;

impl Validator for Panicking {
    fn concern(&self) -> Concern {
        Concern::Structure
    }

    fn validate(&self, _snapshot: &Snapshot) -> Result<Vec<Finding>, WorkerError> {
        panic!("boom");
    }
}

/// Claims every blueprint document as a write target but changes nothing.
struct Shadow;

impl Reconciler for Shadow {
    fn concern(&self) -> Concern {
        Concern::Documents
    }

    fn write_targets(&self, _findings: &[Finding], snapshot: &Snapshot) -> BTreeSet<PathBuf> {
        snapshot
            .blueprint
            .documents
            .iter()
            .map(|d| snapshot.blueprint.document_path(d))
            .collect()
    }

    fn apply(&self, _findings: &[Finding], _ctx: &ReconcileContext) -> Result<ReconcileOutput, WorkerError> {
        Ok(ReconcileOutput::default())
    }
}

/// Reports a created document every round without writing it.
struct Churning;

impl Reconciler for Churning {
    fn concern(&self) -> Concern {
        Concern::Documents
    }

    fn apply(&self, findings: &[Finding], _ctx: &ReconcileContext) -> Result<ReconcileOutput, WorkerError> {
        let mut out = ReconcileOutput::default();
        for f in findings {
            out.changes.created.push(ChangeEntry {
                concern: Concern::Documents,
                target: f.target.clone(),
                note: "pretended to write".into(),
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// 1. Convergence and idempotency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_project_converges_and_second_run_writes_nothing() {
    let dir = scaffolded().await;
    assert!(dir.path().join("docs/PRD.md").is_file());
    assert!(dir.path().join(".claude/agents/coordinator.md").is_file());
    assert!(dir.path().join("CLAUDE.md").is_file());

    let state_before = fs::read(status_path(dir.path())).unwrap();
    let report = Orchestrator::open(dir.path())
        .unwrap()
        .run(&mut AutoApprove)
        .await
        .unwrap();
    assert!(report.is_converged());
    assert_eq!(report.rounds, 0);
    assert!(report.all_changes().is_empty());
    assert_eq!(fs::read(status_path(dir.path())).unwrap(), state_before);
}

#[tokio::test]
async fn deleted_files_are_three_must_fix_and_restored_in_one_round() {
    let dir = scaffolded().await;
    let custom = "# Mine\n\n## Summary\n## Goals\n## Stakeholders\n";
    fs::write(dir.path().join("docs/PROJECT_OVERVIEW.md"), custom).unwrap();
    fs::remove_file(dir.path().join("docs/PRD.md")).unwrap();
    fs::remove_file(dir.path().join("docs/SECURITY.md")).unwrap();
    fs::remove_file(dir.path().join(".claude/agents/test-engineer.md")).unwrap();

    let mut orch = Orchestrator::open(dir.path()).unwrap();
    let plan = orch.validate().await.unwrap();
    assert_eq!(plan.must_fix.len(), 3);

    let report = orch.run(&mut AutoApprove).await.unwrap();
    assert!(report.is_converged());
    assert_eq!(report.rounds, 1);
    assert_eq!(report.all_changes().created.len(), 3);
    assert!(dir.path().join("docs/PRD.md").is_file());
    assert_eq!(
        fs::read_to_string(dir.path().join("docs/PROJECT_OVERVIEW.md")).unwrap(),
        custom
    );
}

#[tokio::test]
async fn orphaned_entity_document_is_recreated() {
    let dir = scaffolded().await;
    let r = StoryRef::parse("payments/epic-1/story-1").unwrap();
    let mut ws = scaffold::Workspace::open(dir.path()).unwrap();
    ws.create_feature(&r.feature).unwrap();
    ws.create_epic(&r.feature, &r.epic).unwrap();
    let story_doc = ws.create_story(&r, &["a".into()]).unwrap();
    ws.commit().unwrap();
    fs::remove_file(dir.path().join(&story_doc)).unwrap();

    let report = Orchestrator::open(dir.path())
        .unwrap()
        .run(&mut AutoApprove)
        .await
        .unwrap();
    assert!(report.is_converged());
    assert!(dir.path().join(&story_doc).is_file());
}

#[tokio::test]
async fn multiple_active_features_are_repaired_in_the_ledger() {
    let dir = scaffolded().await;
    let path = status_path(dir.path());
    let mut ledger: Ledger = store::load(&path).unwrap().into_ledger();
    for name in ["alpha", "beta"] {
        let mut f = loom_core::ledger::Feature::new(FeatureName::new(name).unwrap());
        f.is_active = true;
        ledger.features.push(f);
    }
    let mut doc = StatusDocument::from_ledger(ledger);
    store::save(&mut doc, &path).unwrap();

    let plan = Orchestrator::open(dir.path()).unwrap().validate().await.unwrap();
    assert!(plan.must_fix.iter().any(|f| f.severity == Severity::Critical));

    let report = Orchestrator::open(dir.path())
        .unwrap()
        .run(&mut AutoApprove)
        .await
        .unwrap();
    assert!(report.is_converged());
    let ledger = store::load(&path).unwrap().into_ledger();
    assert_eq!(ledger.features.iter().filter(|f| f.is_active).count(), 1);
}

// ---------------------------------------------------------------------------
// 2. Worker failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicking_validator_becomes_one_critical_finding() {
    let dir = scaffolded().await;
    fs::remove_file(dir.path().join("docs/PRD.md")).unwrap();

    let mut set = validators::standard();
    set.push(Arc::new(Panicking));
    let plan = Orchestrator::open(dir.path())
        .unwrap()
        .with_validators(set)
        .validate()
        .await
        .unwrap();

    let crashes: Vec<_> = plan
        .must_fix
        .iter()
        .filter(|f| f.target == Target::State("validator/structure".into()))
        .collect();
    assert_eq!(crashes.len(), 1);
    assert_eq!(crashes[0].severity, Severity::Critical);
    assert!(crashes[0].description.contains("boom"));
    assert!(plan
        .must_fix
        .iter()
        .any(|f| f.target == Target::Path(PathBuf::from("docs/PRD.md"))));
}

// ---------------------------------------------------------------------------
// 3. Approval, cancellation and abort paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn declined_plan_aborts_without_writes() {
    let dir = scaffolded().await;
    fs::remove_file(dir.path().join("docs/PRD.md")).unwrap();

    let mut decline = |_plan: &RemediationPlan| Approval::Decline;
    let report = Orchestrator::open(dir.path())
        .unwrap()
        .run(&mut decline)
        .await
        .unwrap();
    assert!(matches!(
        report.outcome,
        Outcome::Aborted {
            reason: AbortReason::Declined,
            ..
        }
    ));
    assert_eq!(residual(&report.outcome).must_fix.len(), 1);
    assert!(!dir.path().join("docs/PRD.md").exists());
}

#[tokio::test]
async fn deferred_plan_is_returned_for_confirmation() {
    let dir = scaffolded().await;
    fs::remove_file(dir.path().join("CLAUDE.md")).unwrap();

    let mut defer = |_plan: &RemediationPlan| Approval::Defer;
    let report = Orchestrator::open(dir.path())
        .unwrap()
        .run(&mut defer)
        .await
        .unwrap();
    match report.outcome {
        Outcome::AwaitingApproval { plan } => assert_eq!(plan.must_fix.len(), 1),
        other => panic!("expected pending plan, got {other:?}"),
    }
    assert!(!dir.path().join("CLAUDE.md").exists());
}

#[tokio::test]
async fn cancellation_is_honoured_before_reconciling() {
    let dir = scaffolded().await;
    fs::remove_file(dir.path().join("docs/PRD.md")).unwrap();

    let cancel = CancelFlag::new();
    cancel.cancel();
    let report = Orchestrator::open(dir.path())
        .unwrap()
        .with_cancel_flag(cancel)
        .run(&mut AutoApprove)
        .await
        .unwrap();
    assert!(matches!(
        report.outcome,
        Outcome::Aborted {
            reason: AbortReason::Cancelled,
            ..
        }
    ));
    assert_eq!(report.rounds, 0);
}

#[tokio::test]
async fn round_without_changes_aborts_with_no_progress() {
    let dir = scaffolded().await;
    fs::remove_file(dir.path().join("docs/PRD.md")).unwrap();

    let report = Orchestrator::open(dir.path())
        .unwrap()
        .with_reconcilers(Vec::new())
        .run(&mut AutoApprove)
        .await
        .unwrap();
    assert!(matches!(
        report.outcome,
        Outcome::Aborted {
            reason: AbortReason::NoProgress,
            ..
        }
    ));
    assert_eq!(report.rounds, 1);
    assert_eq!(residual(&report.outcome).must_fix.len(), 1);
}

#[tokio::test]
async fn changes_that_never_clear_findings_hit_the_round_bound() {
    let dir = scaffolded().await;
    fs::remove_file(dir.path().join("docs/PRD.md")).unwrap();

    let report = Orchestrator::open(dir.path())
        .unwrap()
        .with_reconcilers(vec![Arc::new(Churning)])
        .with_options(RunOptions {
            max_rounds: 2,
            ..RunOptions::default()
        })
        .run(&mut AutoApprove)
        .await
        .unwrap();
    assert!(
        matches!(
            report.outcome,
            Outcome::Aborted {
                reason: AbortReason::RetryBoundExceeded,
                ..
            }
        ),
        "{:?}",
        report.outcome
    );
    assert_eq!(report.rounds, 2);
    assert_eq!(report.changes.len(), 2);
    assert_eq!(residual(&report.outcome).must_fix.len(), 1);
    assert!(!dir.path().join("docs/PRD.md").exists());
}

#[tokio::test]
async fn overlapping_write_targets_still_converge() {
    let dir = scaffolded().await;
    fs::remove_file(dir.path().join("docs/PRD.md")).unwrap();

    let mut set = reconcilers::standard();
    set.push(Arc::new(Shadow));
    let report = Orchestrator::open(dir.path())
        .unwrap()
        .with_reconcilers(set)
        .run(&mut AutoApprove)
        .await
        .unwrap();
    assert!(report.is_converged());
    assert_eq!(report.all_changes().created.len(), 1);
}

// ---------------------------------------------------------------------------
// 4. Scale and migration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fifty_story_project_validates_quickly() {
    let dir = scaffolded().await;
    let mut ws = scaffold::Workspace::open(dir.path()).unwrap();
    let feature = FeatureName::new("catalog").unwrap();
    ws.create_feature(&feature).unwrap();
    for e in 1..=5 {
        let epic = loom_core::EpicName::new(format!("epic-{e}")).unwrap();
        ws.create_epic(&feature, &epic).unwrap();
        for s in 1..=10 {
            let r = StoryRef::parse(&format!("catalog/epic-{e}/story-{s}")).unwrap();
            ws.create_story(&r, &["build".into(), "test".into()]).unwrap();
        }
    }
    ws.commit().unwrap();

    let started = Instant::now();
    let report = Orchestrator::open(dir.path())
        .unwrap()
        .run(&mut AutoApprove)
        .await
        .unwrap();
    assert!(report.is_converged());
    assert!(started.elapsed() < Duration::from_secs(10));
}

fn write_flat(root: &Path) {
    let mut doc = StatusDocument::from_ledger(Ledger::new("legacy"));
    store::save(&mut doc, &root.join("status.xml")).unwrap();
    fs::write(root.join("PRD.md"), "# Product Requirements\n").unwrap();
}

#[tokio::test]
async fn migrated_flat_project_reconciles() {
    let dir = TempDir::new().unwrap();
    write_flat(dir.path());

    let report = migrate(dir.path(), Layout::Flat, Layout::Standard, false).unwrap();
    assert!(report.conflicts().next().is_none());
    assert!(status_path(dir.path()).is_file());

    let run = Orchestrator::open(dir.path())
        .unwrap()
        .run(&mut AutoApprove)
        .await
        .unwrap();
    assert!(run.is_converged(), "{:?}", run.outcome);
    let prd = fs::read_to_string(dir.path().join("docs/PRD.md")).unwrap();
    assert!(prd.starts_with("# Product Requirements"));
    assert!(prd.contains("## Success Metrics"));
}
