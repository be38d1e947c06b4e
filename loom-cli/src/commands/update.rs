//! `loom update <dir> [--yes] [--allow-destructive]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use loom_reconcile::{Approval, Orchestrator, RemediationPlan};

use super::{cancel_on_ctrl_c, print_json, print_report, project_root, runtime, Exit};

/// Without `--yes` the plan is printed and nothing is written.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Project directory.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Apply the remediation plan without asking.
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Also apply fixes that replace existing content.
    #[arg(long)]
    pub allow_destructive: bool,

    /// Emit the run report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl UpdateArgs {
    pub fn run(self) -> Result<Exit> {
        let root = project_root(&self.dir)?;
        let yes = self.yes;
        let mut approver = move |_plan: &RemediationPlan| {
            if yes {
                Approval::Approve
            } else {
                Approval::Defer
            }
        };

        let report = runtime()?
            .block_on(async {
                let mut orch = Orchestrator::open(&root)?;
                let mut options = orch.options().clone();
                options.allow_destructive = self.allow_destructive;
                orch = orch.with_options(options);
                cancel_on_ctrl_c(orch.cancel_flag());
                orch.run(&mut approver).await
            })
            .with_context(|| format!("update failed for '{}'", root.display()))?;

        if self.json {
            print_json(&report)?;
        } else {
            print_report(&report);
        }
        Ok(Exit::from(&report.outcome))
    }
}
