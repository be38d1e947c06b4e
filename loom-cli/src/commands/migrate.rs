//! `loom migrate <dir> --from <layout> --to <layout> [--dry-run]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use loom_core::Layout;
use loom_reconcile::{migrate, MoveStatus};

use super::{print_json, project_root, Exit};

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Project directory.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Current layout: flat | standard.
    #[arg(long)]
    pub from: Layout,

    /// Target layout: flat | standard.
    #[arg(long)]
    pub to: Layout,

    /// Show the planned moves without touching any file.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the migration report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl MigrateArgs {
    pub fn run(self) -> Result<Exit> {
        let root = project_root(&self.dir)?;
        let report = migrate(&root, self.from, self.to, self.dry_run).with_context(|| {
            format!(
                "cannot migrate '{}' from {} to {}",
                root.display(),
                self.from,
                self.to
            )
        })?;

        if self.json {
            print_json(&report)?;
            return Ok(Exit::Success);
        }

        let prefix = if self.dry_run { "[dry-run] " } else { "" };
        if report.moves.is_empty() {
            println!("{prefix}✓ already {}", self.to);
            return Ok(Exit::Success);
        }
        for m in &report.moves {
            let marker = match m.status {
                MoveStatus::Moved => "→".green().to_string(),
                MoveStatus::WouldMove => "~".to_string(),
                MoveStatus::Conflict => "!".yellow().bold().to_string(),
                MoveStatus::Missing => continue,
            };
            println!("  {marker}  {} -> {}", m.from.display(), m.to.display());
        }
        let conflicts = report.conflicts().count();
        println!(
            "{prefix}{} file(s) moved, {conflicts} conflict(s) left in place",
            report.moved()
        );
        Ok(Exit::Success)
    }
}
