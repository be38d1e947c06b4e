//! Reconciliation orchestrator: the validate, approve, reconcile, verify
//! state machine.
//!
//! ```text
//! Idle -> Validating -> AwaitingApproval -> Reconciling -> Verifying -> Converged
//!              |               |                ^             |
//!              v               v                +-------------+
//!          Converged        Aborted                       Aborted
//! ```
//!
//! Workers run on the blocking pool over one `Arc<Snapshot>` per phase and
//! are joined before the machine moves on. The state document is loaded and
//! saved only here, once per reconciling phase.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};

use loom_core::layout::status_path;
use loom_core::{store, Blueprint, EngineConfig, Ledger, Model, StateStore, StatusDocument};
use loom_renderer::Renderer;

use crate::error::{EngineError, WorkerError};
use crate::finding::{Concern, Finding, Target};
use crate::reconcilers::{
    self, ChangeEntry, ChangeLog, LedgerEdit, ReconcileContext, ReconcileOutput, Reconciler,
};
use crate::snapshot::Snapshot;
use crate::synthesizer::{synthesize, RemediationPlan};
use crate::validators::{self, Validator};

// ---------------------------------------------------------------------------
// 1. States and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineState {
    Idle,
    Validating,
    AwaitingApproval,
    Reconciling,
    Verifying,
    Converged,
    Aborted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::Validating => "validating",
            PipelineState::AwaitingApproval => "awaiting-approval",
            PipelineState::Reconciling => "reconciling",
            PipelineState::Verifying => "verifying",
            PipelineState::Converged => "converged",
            PipelineState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub round: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortReason {
    Declined,
    Cancelled,
    NoProgress,
    RetryBoundExceeded,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortReason::Declined => "plan declined",
            AbortReason::Cancelled => "cancelled",
            AbortReason::NoProgress => "no progress in the last round",
            AbortReason::RetryBoundExceeded => "retry bound exceeded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
    Converged,
    /// Stopped before reconciling; the plan waits for confirmation.
    AwaitingApproval { plan: RemediationPlan },
    Aborted {
        reason: AbortReason,
        residual: RemediationPlan,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: Outcome,
    /// The initial plan followed by one plan per verifying pass.
    pub plans: Vec<RemediationPlan>,
    /// One change log per reconciling round.
    pub changes: Vec<ChangeLog>,
    pub transitions: Vec<Transition>,
    pub rounds: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_converged(&self) -> bool {
        self.outcome == Outcome::Converged
    }

    /// Every change of every round.
    pub fn all_changes(&self) -> ChangeLog {
        let mut all = ChangeLog::default();
        for c in &self.changes {
            all.merge(c.clone());
        }
        all
    }
}

// ---------------------------------------------------------------------------
// 2. Approval and cancellation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approve,
    Decline,
    /// Leave the plan pending without deciding.
    Defer,
}

/// Decides whether a remediation plan may be applied.
pub trait Approver: Send {
    fn review(&mut self, plan: &RemediationPlan) -> Approval;
}

impl<F> Approver for F
where
    F: FnMut(&RemediationPlan) -> Approval + Send,
{
    fn review(&mut self, plan: &RemediationPlan) -> Approval {
        self(plan)
    }
}

/// Approves every plan.
pub struct AutoApprove;

impl Approver for AutoApprove {
    fn review(&mut self, _plan: &RemediationPlan) -> Approval {
        Approval::Approve
    }
}

/// Cooperative cancellation, checked only between barriers.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// 3. Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub max_rounds: u32,
    pub apply_optional: bool,
    pub allow_destructive: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RunOptions {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            max_rounds: cfg.max_rounds.max(1),
            apply_optional: cfg.apply_optional,
            allow_destructive: false,
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    root: PathBuf,
    store: StateStore,
    blueprint: Blueprint,
    renderer: Arc<Renderer>,
    validators: Vec<Arc<dyn Validator>>,
    reconcilers: Vec<Arc<dyn Reconciler>>,
    options: RunOptions,
    cancel: CancelFlag,
}

impl Orchestrator {
    /// Orchestrator for the project at `root`, configured from
    /// `.loom/config.yaml`.
    pub fn open(root: &Path) -> Result<Self, EngineError> {
        let config = EngineConfig::load_at(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            store: StateStore::new(status_path(root)).with_retention(config.backup_retention),
            blueprint: config.blueprint(),
            renderer: Arc::new(Renderer::for_project(root)?),
            validators: validators::standard(),
            reconcilers: reconcilers::standard(),
            options: RunOptions::from(&config),
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_validators(mut self, validators: Vec<Arc<dyn Validator>>) -> Self {
        self.validators = validators;
        self
    }

    pub fn with_reconcilers(mut self, reconcilers: Vec<Arc<dyn Reconciler>>) -> Self {
        self.reconcilers = reconcilers;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// One validating pass with no approval and no writes.
    pub async fn validate(&self) -> Result<RemediationPlan, EngineError> {
        let doc = self.load().await?;
        let snapshot = self.capture(doc.ledger().clone()).await?;
        Ok(self.run_validators(snapshot).await)
    }

    /// Drive the full state machine.
    pub async fn run(&mut self, approver: &mut dyn Approver) -> Result<RunReport, EngineError> {
        let mut run = Run::new();

        run.goto(PipelineState::Validating);
        let mut doc = self.load().await?;
        let mut snapshot = self.capture(doc.ledger().clone()).await?;
        let mut plan = self.run_validators(Arc::clone(&snapshot)).await;
        run.plans.push(plan.clone());

        if plan.is_converged() {
            run.goto(PipelineState::Converged);
            return Ok(run.finish(Outcome::Converged));
        }
        if self.cancel.is_cancelled() {
            return Ok(run.abort(AbortReason::Cancelled, plan));
        }

        run.goto(PipelineState::AwaitingApproval);
        match approver.review(&plan) {
            Approval::Approve => {}
            Approval::Defer => return Ok(run.finish(Outcome::AwaitingApproval { plan })),
            Approval::Decline => return Ok(run.abort(AbortReason::Declined, plan)),
        }
        if self.cancel.is_cancelled() {
            return Ok(run.abort(AbortReason::Cancelled, plan));
        }

        loop {
            run.round += 1;
            run.goto(PipelineState::Reconciling);
            let mut outcome = self.run_reconcilers(Arc::clone(&snapshot), &plan).await;
            let ledger_changed = self.commit_edits(&mut doc, &snapshot, &mut outcome)?;
            let progressed = !outcome.is_empty() || ledger_changed;
            run.changes.push(outcome.changes);

            run.goto(PipelineState::Verifying);
            snapshot = self.capture(doc.ledger().clone()).await?;
            plan = self.run_validators(Arc::clone(&snapshot)).await;
            run.plans.push(plan.clone());

            if plan.is_converged() {
                run.goto(PipelineState::Converged);
                tracing::info!(rounds = run.round, "converged");
                return Ok(run.finish(Outcome::Converged));
            }
            if !progressed {
                return Ok(run.abort(AbortReason::NoProgress, plan));
            }
            if run.round >= self.options.max_rounds {
                return Ok(run.abort(AbortReason::RetryBoundExceeded, plan));
            }
            if self.cancel.is_cancelled() {
                return Ok(run.abort(AbortReason::Cancelled, plan));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phase helpers
    // -----------------------------------------------------------------------

    async fn load(&self) -> Result<StatusDocument, EngineError> {
        let path = self.store.path().to_path_buf();
        tokio::task::spawn_blocking(move || store::load(&path))
            .await
            .map_err(|e| EngineError::Join(e.to_string()))?
            .map_err(EngineError::from)
    }

    async fn capture(&self, ledger: Ledger) -> Result<Arc<Snapshot>, EngineError> {
        let root = self.root.clone();
        let blueprint = self.blueprint.clone();
        let snapshot = tokio::task::spawn_blocking(move || Snapshot::capture(&root, ledger, blueprint))
            .await
            .map_err(|e| EngineError::Join(e.to_string()))??;
        Ok(Arc::new(snapshot))
    }

    /// Fan out every validator and wait for all of them.
    async fn run_validators(&self, snapshot: Arc<Snapshot>) -> RemediationPlan {
        let handles: Vec<_> = self
            .validators
            .iter()
            .map(|v| {
                let v = Arc::clone(v);
                let snap = Arc::clone(&snapshot);
                let concern = v.concern();
                (concern, tokio::task::spawn_blocking(move || v.validate(&snap)))
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (concern, handle) in handles {
            let report = match handle.await {
                Ok(Ok(findings)) => findings,
                Ok(Err(err)) => {
                    tracing::warn!(%concern, "validator failed: {err}");
                    vec![Finding::worker_failure(concern, &err.to_string())]
                }
                Err(join) => {
                    let reason = join_reason(join);
                    tracing::warn!(%concern, "validator crashed: {reason}");
                    vec![Finding::worker_failure(concern, &reason)]
                }
            };
            reports.push(report);
        }
        let plan = synthesize(reports);
        tracing::info!(
            must_fix = plan.must_fix.len(),
            optional = plan.optional.len(),
            "validation complete"
        );
        plan
    }

    /// Fan out reconcilers with work to do. Those whose write targets
    /// overlap run one at a time after the concurrent wave.
    async fn run_reconcilers(&self, snapshot: Arc<Snapshot>, plan: &RemediationPlan) -> ReconcileRound {
        let ctx = Arc::new(ReconcileContext::new(
            Arc::clone(&snapshot),
            Arc::clone(&self.renderer),
            self.options.allow_destructive,
        ));

        let jobs: Vec<Job> = self
            .reconcilers
            .iter()
            .filter_map(|r| {
                let findings = plan.for_concern(r.concern(), self.options.apply_optional);
                if findings.is_empty() {
                    return None;
                }
                let targets = r.write_targets(&findings, &snapshot);
                Some(Job {
                    reconciler: Arc::clone(r),
                    findings,
                    targets,
                })
            })
            .collect();

        let (concurrent, serial) = partition_conflicts(jobs);
        let mut round = ReconcileRound::default();

        let handles: Vec<_> = concurrent
            .into_iter()
            .map(|job| {
                let concern = job.reconciler.concern();
                (concern, spawn_job(job, Arc::clone(&ctx)))
            })
            .collect();
        for (concern, handle) in handles {
            round.absorb(concern, handle.await);
        }

        for job in serial {
            let concern = job.reconciler.concern();
            tracing::debug!(%concern, "running reconciler serially");
            round.absorb(concern, spawn_job(job, Arc::clone(&ctx)).await);
        }
        round
    }

    /// Apply ledger edits in concern order and save once if anything changed.
    fn commit_edits(
        &mut self,
        doc: &mut StatusDocument,
        snapshot: &Snapshot,
        round: &mut ReconcileRound,
    ) -> Result<bool, EngineError> {
        round.edits.sort_by_key(|(concern, _)| *concern);
        let mut model = Model::new(snapshot.ledger().clone());
        for (concern, edit) in &round.edits {
            let before = model.ledger().clone();
            edit.apply(&mut model);
            if model.ledger() != &before {
                round.changes.updated.push(ChangeEntry {
                    concern: *concern,
                    target: Target::State("ledger".into()),
                    note: edit.describe(),
                });
            }
        }

        let ledger = model.into_ledger();
        if &ledger == doc.ledger() {
            return Ok(false);
        }
        doc.set_ledger(ledger);
        self.store.save(doc)?;
        tracing::info!(path = %self.store.path().display(), "state document saved");
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// 5. Run bookkeeping and reconciler jobs
// ---------------------------------------------------------------------------

struct Run {
    state: PipelineState,
    transitions: Vec<Transition>,
    plans: Vec<RemediationPlan>,
    changes: Vec<ChangeLog>,
    round: u32,
    started_at: DateTime<Utc>,
}

impl Run {
    fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            transitions: Vec::new(),
            plans: Vec::new(),
            changes: Vec::new(),
            round: 0,
            started_at: Utc::now(),
        }
    }

    fn goto(&mut self, to: PipelineState) {
        tracing::debug!(from = %self.state, %to, round = self.round, "transition");
        self.transitions.push(Transition {
            from: self.state,
            to,
            round: self.round,
        });
        self.state = to;
    }

    fn abort(mut self, reason: AbortReason, residual: RemediationPlan) -> RunReport {
        tracing::warn!(%reason, residual = residual.must_fix.len(), "reconciliation aborted");
        self.goto(PipelineState::Aborted);
        self.finish(Outcome::Aborted { reason, residual })
    }

    fn finish(self, outcome: Outcome) -> RunReport {
        RunReport {
            outcome,
            plans: self.plans,
            changes: self.changes,
            transitions: self.transitions,
            rounds: self.round,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

struct Job {
    reconciler: Arc<dyn Reconciler>,
    findings: Vec<Finding>,
    targets: BTreeSet<PathBuf>,
}

type JobResult = Result<Result<ReconcileOutput, WorkerError>, JoinError>;

fn spawn_job(job: Job, ctx: Arc<ReconcileContext>) -> JoinHandle<Result<ReconcileOutput, WorkerError>> {
    tokio::task::spawn_blocking(move || job.reconciler.apply(&job.findings, &ctx))
}

/// Jobs whose targets overlap any other job's go to the serial list.
fn partition_conflicts(jobs: Vec<Job>) -> (Vec<Job>, Vec<Job>) {
    let conflicted: Vec<bool> = jobs
        .iter()
        .enumerate()
        .map(|(i, a)| {
            jobs.iter()
                .enumerate()
                .any(|(j, b)| i != j && !a.targets.is_disjoint(&b.targets))
        })
        .collect();
    let mut concurrent = Vec::new();
    let mut serial = Vec::new();
    for (job, conflict) in jobs.into_iter().zip(conflicted) {
        if conflict {
            serial.push(job);
        } else {
            concurrent.push(job);
        }
    }
    (concurrent, serial)
}

#[derive(Default)]
struct ReconcileRound {
    changes: ChangeLog,
    edits: Vec<(Concern, LedgerEdit)>,
}

impl ReconcileRound {
    fn absorb(&mut self, concern: Concern, result: JobResult) {
        match result {
            Ok(Ok(out)) => {
                self.changes.merge(out.changes);
                self.edits.extend(out.edits.into_iter().map(|e| (concern, e)));
            }
            Ok(Err(err)) => {
                tracing::warn!(%concern, "reconciler failed: {err}");
                self.changes.fail(
                    concern,
                    Target::State(format!("reconciler/{concern}")),
                    err.to_string(),
                );
            }
            Err(join) => {
                let reason = join_reason(join);
                tracing::warn!(%concern, "reconciler crashed: {reason}");
                self.changes
                    .fail(concern, Target::State(format!("reconciler/{concern}")), reason);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Human-readable cause of a worker that did not return.
fn join_reason(err: JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        if let Some(s) = payload.downcast_ref::<&str>() {
            return format!("panicked: {s}");
        }
        if let Some(s) = payload.downcast_ref::<String>() {
            return format!("panicked: {s}");
        }
        return "panicked".into();
    }
    err.to_string()
}
