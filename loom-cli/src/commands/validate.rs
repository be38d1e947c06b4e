//! `loom validate <dir>`: read-only check.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use loom_reconcile::Orchestrator;

use super::{print_json, print_plan, project_root, runtime, Exit};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Project directory.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Emit the remediation plan as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ValidateArgs {
    pub fn run(self) -> Result<Exit> {
        let root = project_root(&self.dir)?;
        let plan = runtime()?
            .block_on(async { Orchestrator::open(&root)?.validate().await })
            .with_context(|| format!("validation failed for '{}'", root.display()))?;

        if self.json {
            print_json(&plan)?;
        } else {
            print_plan(&plan);
        }
        Ok(if plan.is_converged() {
            Exit::Success
        } else {
            Exit::MustFix
        })
    }
}
