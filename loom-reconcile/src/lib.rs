//! # loom-reconcile
//!
//! Validation, remediation planning and reconciliation of a Loom project.
//!
//! [`Orchestrator::run`] drives one pass of the pipeline: concurrent
//! validators produce [`Finding`]s, [`synthesize`] merges them into a
//! [`RemediationPlan`], an [`Approver`] gates it, and reconcilers apply the
//! fixes before the project is validated again. [`scaffold`] and
//! [`migrate`] cover project creation and layout moves.

pub mod error;
pub mod finding;
pub mod migrate;
pub mod orchestrator;
pub mod reconcilers;
pub mod scaffold;
pub mod snapshot;
pub mod synthesizer;
pub mod validators;
pub mod writer;

pub use error::{EngineError, WorkerError};
pub use finding::{Concern, Finding, FixAction, Severity, SuggestedFix, Target};
pub use migrate::{migrate, MigrationReport, MoveStatus};
pub use orchestrator::{
    AbortReason, Approval, Approver, AutoApprove, CancelFlag, Orchestrator, Outcome, PipelineState,
    RunOptions, RunReport,
};
pub use reconcilers::{ChangeEntry, ChangeLog, Reconciler};
pub use scaffold::Workspace;
pub use snapshot::Snapshot;
pub use synthesizer::{synthesize, RemediationPlan};
pub use validators::Validator;
pub use writer::WriteResult;
