//! `loom restore <dir> [--list] [--backup <file>]`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use loom_core::layout::status_path;
use loom_core::store;

use super::{print_json, project_root, Exit};

/// Recovery is always explicit: nothing else ever restores a backup.
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Project directory.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// List recorded backups instead of restoring.
    #[arg(long, conflicts_with = "backup")]
    pub list: bool,

    /// Restore this backup file instead of the newest valid one.
    #[arg(long)]
    pub backup: Option<PathBuf>,

    /// Emit JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "created")]
    created: String,
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "sha256")]
    sha256: String,
}

impl RestoreArgs {
    pub fn run(self) -> Result<Exit> {
        let root = project_root(&self.dir)?;
        let path = status_path(&root);

        if self.list {
            let backups = store::list_backups(&path).context("failed to read backup manifest")?;
            if self.json {
                print_json(&backups)?;
            } else if backups.is_empty() {
                println!("No backups recorded.");
            } else {
                let rows: Vec<BackupRow> = backups
                    .iter()
                    .map(|b| BackupRow {
                        created: b.created_at.to_rfc3339(),
                        file: b
                            .file
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        sha256: b.sha256.chars().take(12).collect(),
                    })
                    .collect();
                let mut table = Table::new(rows);
                table.with(Style::rounded());
                println!("{table}");
            }
            return Ok(Exit::Success);
        }

        let (entry, doc) = match &self.backup {
            Some(file) => {
                let wanted = root.join(file);
                let backups = store::list_backups(&path).context("failed to read backup manifest")?;
                let Some(entry) = backups
                    .into_iter()
                    .find(|b| b.file == wanted || b.file.file_name() == file.file_name())
                else {
                    bail!("'{}' is not a recorded backup", file.display());
                };
                let doc = store::restore(&path, &entry)
                    .with_context(|| format!("failed to restore '{}'", entry.file.display()))?;
                (entry, doc)
            }
            None => store::restore_latest(&path).context("no usable backup to restore")?,
        };

        if self.json {
            print_json(&entry)?;
        } else {
            println!(
                "{} restored '{}' from {}",
                "✓".green().bold(),
                doc.ledger().project.name,
                entry.file.display()
            );
        }
        Ok(Exit::Success)
    }
}
