//! `loom init <dir> [--name <project>]`

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use loom_reconcile::{scaffold, AutoApprove, Orchestrator};

use super::{cancel_on_ctrl_c, print_json, print_report, project_root, runtime, Exit};

/// Create the state document, then reconcile until the skeleton exists.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Project directory; created if missing.
    pub dir: PathBuf,

    /// Project name. Defaults to the directory name.
    #[arg(long, short = 'n')]
    pub name: Option<String>,

    /// Emit the run report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<Exit> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create '{}'", self.dir.display()))?;
        let root = project_root(&self.dir)?;
        let name = self
            .name
            .unwrap_or_else(|| scaffold::default_project_name(&root));

        let status = scaffold::init(&root, &name)
            .with_context(|| format!("failed to initialise '{}'", root.display()))?;

        let rt = runtime()?;
        let report = rt.block_on(async {
            let mut orch = Orchestrator::open(&root)?;
            cancel_on_ctrl_c(orch.cancel_flag());
            orch.run(&mut AutoApprove).await
        })?;

        if self.json {
            print_json(&report)?;
        } else {
            println!(
                "{} initialised '{}' ({})",
                "✓".green().bold(),
                name,
                status.display()
            );
            print_report(&report);
        }
        Ok(Exit::from(&report.outcome))
    }
}
