//! `loom status <dir>`: the hierarchy, story progress and current position.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use loom_core::{store, Ledger, StoryStatus};
use loom_detector::{detect_layout, DetectedLayout};

use super::{print_json, project_root, Exit};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Project directory.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusReportJson<'a> {
    layout: &'a DetectedLayout,
    ledger: &'a Ledger,
}

#[derive(Tabled)]
struct StoryRow {
    #[tabled(rename = "story")]
    story: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "tasks")]
    tasks: String,
    #[tabled(rename = "review")]
    review: usize,
}

impl StatusArgs {
    pub fn run(self) -> Result<Exit> {
        let root = project_root(&self.dir)?;
        let layout = detect_layout(&root)
            .with_context(|| format!("no Loom project at '{}' (run `loom init`)", root.display()))?;
        let ledger = store::load(&root.join(layout.layout.status_file()))
            .context("failed to load the state document")?
            .into_ledger();

        if self.json {
            print_json(&StatusReportJson {
                layout: &layout,
                ledger: &ledger,
            })?;
            return Ok(Exit::Success);
        }

        print_summary(&layout, &ledger);
        print_features(&ledger);
        Ok(Exit::Success)
    }
}

fn print_summary(layout: &DetectedLayout, ledger: &Ledger) {
    let modified = ledger
        .project
        .last_modified
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{} | {} layout | last modified {}",
        ledger.project.name.bold(),
        layout.layout,
        modified
    );
    if !layout.leftovers.is_empty() {
        println!(
            "{} flat-layout files at the root: {}",
            "!".yellow().bold(),
            layout
                .leftovers
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let pos = &ledger.position;
    if pos.is_empty() {
        println!("Position: none");
    } else {
        let parts: Vec<String> = [
            pos.feature.as_ref().map(|v| v.to_string()),
            pos.epic.as_ref().map(|v| v.to_string()),
            pos.story.as_ref().map(|v| v.to_string()),
        ]
        .into_iter()
        .flatten()
        .collect();
        let task = pos
            .task
            .as_ref()
            .map(|t| format!(" task {t}"))
            .unwrap_or_default();
        println!("Position: {}{task}", parts.join("/").cyan());
    }
}

fn status_label(status: StoryStatus) -> String {
    match status {
        StoryStatus::NotStarted => status.to_string().bright_black().to_string(),
        StoryStatus::InProgress => status.to_string().yellow().to_string(),
        StoryStatus::WaitingForReview => status.to_string().magenta().to_string(),
        StoryStatus::Done => status.to_string().green().to_string(),
    }
}

fn print_features(ledger: &Ledger) {
    if ledger.features.is_empty() {
        println!("No features yet. Create one with `loom feature create <name>`.");
        return;
    }
    for feature in &ledger.features {
        let marker = if feature.is_active {
            " (active)".green().bold().to_string()
        } else {
            String::new()
        };
        println!("{}{marker}", feature.name.as_str().to_uppercase().bold());
        for epic in &feature.epics {
            let rows: Vec<StoryRow> = epic
                .stories
                .iter()
                .map(|s| StoryRow {
                    story: s.id.to_string(),
                    status: status_label(s.status),
                    tasks: format!(
                        "{}/{}",
                        s.tasks.iter().filter(|t| t.done).count(),
                        s.tasks.len()
                    ),
                    review: s.review_tasks.len(),
                })
                .collect();
            let done = if epic.is_complete() { " ✓" } else { "" };
            println!("  {}{done}", epic.name);
            if rows.is_empty() {
                println!("    (no stories)");
                continue;
            }
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
    }
}
