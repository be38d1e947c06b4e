//! Subcommands and the output helpers they share.

pub mod init;
pub mod migrate;
pub mod restore;
pub mod status;
pub mod update;
pub mod validate;
pub mod work;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use loom_reconcile::{
    AbortReason, CancelFlag, ChangeLog, Finding, Outcome, RemediationPlan, RunReport, Severity,
};

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    Error,
    /// Must-fix findings remain and were not confirmed.
    MustFix,
    Aborted,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        match exit {
            Exit::Success => ExitCode::SUCCESS,
            Exit::Error => ExitCode::from(1),
            Exit::MustFix => ExitCode::from(2),
            Exit::Aborted => ExitCode::from(3),
        }
    }
}

impl From<&Outcome> for Exit {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Converged => Exit::Success,
            Outcome::AwaitingApproval { .. } => Exit::MustFix,
            Outcome::Aborted { .. } => Exit::Aborted,
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Multi-threaded runtime for the async engine commands.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

/// Set `flag` on ctrl-c. Must be called inside a runtime.
pub fn cancel_on_ctrl_c(flag: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received ctrl-c, stopping after the current phase");
            flag.cancel();
        }
    });
}

/// Resolve an existing project directory.
pub fn project_root(dir: &Path) -> Result<PathBuf> {
    dir.canonicalize()
        .with_context(|| format!("cannot resolve project directory '{}'", dir.display()))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON output")?
    );
    Ok(())
}

#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "severity")]
    severity: String,
    #[tabled(rename = "concern")]
    concern: String,
    #[tabled(rename = "target")]
    target: String,
    #[tabled(rename = "issue")]
    description: String,
    #[tabled(rename = "fix")]
    fix: String,
}

fn severity_label(severity: Severity) -> String {
    let label = severity.to_string().to_uppercase();
    match severity {
        Severity::Critical => label.red().bold().to_string(),
        Severity::High => label.red().to_string(),
        Severity::Medium => label.yellow().to_string(),
        Severity::Low => label.bright_black().to_string(),
    }
}

fn finding_row(f: &Finding) -> FindingRow {
    let fix = match &f.fix {
        None => "manual".to_string(),
        Some(fix) if fix.destructive => "auto (destructive)".to_string(),
        Some(_) => "auto".to_string(),
    };
    FindingRow {
        severity: severity_label(f.severity),
        concern: f.concern.to_string(),
        target: f.target.to_string(),
        description: f.description.clone(),
        fix,
    }
}

pub fn print_plan(plan: &RemediationPlan) {
    if plan.is_empty() {
        println!("{} nothing to fix", "✓".green().bold());
        return;
    }
    println!(
        "{} must-fix | {} optional",
        plan.must_fix.len().to_string().bold(),
        plan.optional.len()
    );
    let rows: Vec<FindingRow> = plan.findings().map(finding_row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

pub fn print_changes(changes: &ChangeLog) {
    for c in &changes.created {
        println!("  {}  {}", "+".green(), c.target);
    }
    for c in &changes.updated {
        println!("  {}  {} ({})", "✎".yellow(), c.target, c.note);
    }
    for c in &changes.skipped {
        tracing::debug!(target_path = %c.target, note = %c.note, "skipped");
    }
    for c in &changes.failed {
        println!("  {}  {}: {}", "✗".red(), c.target, c.note);
    }
}

pub fn print_report(report: &RunReport) {
    let changes = report.all_changes();
    print_changes(&changes);
    match &report.outcome {
        Outcome::Converged => println!(
            "{} converged after {} round(s): {} created, {} updated",
            "✓".green().bold(),
            report.rounds,
            changes.created.len(),
            changes.updated.len()
        ),
        Outcome::AwaitingApproval { plan } => {
            print_plan(plan);
            println!("Re-run with --yes to apply these fixes.");
        }
        Outcome::Aborted { reason, residual } => {
            println!("{} reconciliation aborted: {reason}", "✗".red().bold());
            if *reason != AbortReason::Declined {
                print_plan(residual);
            }
        }
    }
}
