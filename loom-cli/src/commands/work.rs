//! Hierarchy commands: `feature`, `epic`, `story`, `task` and `review`.
//!
//! Each command is one load/mutate/save cycle through a [`Workspace`]. A
//! rejected operation exits 1 and leaves the state document untouched.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use loom_core::{CommitId, EpicName, FeatureName, StoryRef, TaskId};
use loom_reconcile::{Workspace, WriteResult};

use super::{project_root, Exit};

/// Project directory option shared by every hierarchy command.
#[derive(Args, Debug, Clone)]
pub struct DirArg {
    /// Project directory.
    #[arg(long = "dir", short = 'C', default_value = ".")]
    pub dir: PathBuf,
}

fn open(dir: &Path) -> Result<Workspace> {
    let root = project_root(dir)?;
    Workspace::open(&root).with_context(|| format!("cannot open project at '{}'", root.display()))
}

fn commit(ws: Workspace) -> Result<()> {
    for w in ws.commit().context("failed to save changes")? {
        if let WriteResult::Created { path } = w {
            println!("  {}  {}", "+".green(), path.display());
        }
    }
    Ok(())
}

fn done(msg: impl std::fmt::Display) -> Result<Exit> {
    println!("{} {msg}", "✓".green().bold());
    Ok(Exit::Success)
}

// ---------------------------------------------------------------------------
// feature
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum FeatureCommand {
    /// Add a feature to the ledger and write its document.
    Create {
        name: FeatureName,
        #[command(flatten)]
        dir: DirArg,
    },
    /// Make a feature the single active one.
    Activate {
        name: FeatureName,
        #[command(flatten)]
        dir: DirArg,
    },
}

pub fn feature(cmd: FeatureCommand) -> Result<Exit> {
    match cmd {
        FeatureCommand::Create { name, dir } => {
            let mut ws = open(&dir.dir)?;
            ws.create_feature(&name)?;
            commit(ws)?;
            done(format!("created feature '{name}'"))
        }
        FeatureCommand::Activate { name, dir } => {
            let mut ws = open(&dir.dir)?;
            ws.model_mut().activate_feature(&name)?;
            commit(ws)?;
            done(format!("feature '{name}' is now active"))
        }
    }
}

// ---------------------------------------------------------------------------
// epic
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum EpicCommand {
    /// Add an epic under an existing feature.
    Create {
        feature: FeatureName,
        epic: EpicName,
        #[command(flatten)]
        dir: DirArg,
    },
}

pub fn epic(cmd: EpicCommand) -> Result<Exit> {
    match cmd {
        EpicCommand::Create { feature, epic, dir } => {
            let mut ws = open(&dir.dir)?;
            ws.create_epic(&feature, &epic)?;
            commit(ws)?;
            done(format!("created epic '{feature}/{epic}'"))
        }
    }
}

// ---------------------------------------------------------------------------
// story
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum StoryCommand {
    /// Add a story with its initial tasks.
    Create {
        /// `<feature>/<epic>/<story>`
        #[arg(value_parser = StoryRef::parse)]
        story: StoryRef,
        /// Task description; repeat for several tasks.
        #[arg(long = "task", short = 't')]
        tasks: Vec<String>,
        #[command(flatten)]
        dir: DirArg,
    },
    /// Move a story to in-progress and point the position at it.
    Start {
        #[arg(value_parser = StoryRef::parse)]
        story: StoryRef,
        #[command(flatten)]
        dir: DirArg,
    },
    /// Mark a story done; refused while work is open.
    Close {
        #[arg(value_parser = StoryRef::parse)]
        story: StoryRef,
        #[command(flatten)]
        dir: DirArg,
    },
}

pub fn story(cmd: StoryCommand) -> Result<Exit> {
    match cmd {
        StoryCommand::Create { story, tasks, dir } => {
            let mut ws = open(&dir.dir)?;
            ws.create_story(&story, &tasks)?;
            commit(ws)?;
            done(format!("created story '{story}' with {} task(s)", tasks.len()))
        }
        StoryCommand::Start { story, dir } => {
            let mut ws = open(&dir.dir)?;
            ws.model_mut().start_story(&story)?;
            commit(ws)?;
            done(format!("started '{story}'"))
        }
        StoryCommand::Close { story, dir } => {
            let mut ws = open(&dir.dir)?;
            ws.model_mut().close_story(&story)?;
            commit(ws)?;
            done(format!("closed '{story}'"))
        }
    }
}

// ---------------------------------------------------------------------------
// task
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Mark a task (or review task) complete.
    Complete {
        #[arg(value_parser = StoryRef::parse)]
        story: StoryRef,
        task: TaskId,
        /// Commit that completed the task.
        #[arg(long)]
        commit: Option<CommitId>,
        #[command(flatten)]
        dir: DirArg,
    },
}

pub fn task(cmd: TaskCommand) -> Result<Exit> {
    match cmd {
        TaskCommand::Complete {
            story,
            task,
            commit: commit_id,
            dir,
        } => {
            let mut ws = open(&dir.dir)?;
            let status = ws.model_mut().advance_task(&story, &task, commit_id)?;
            commit(ws)?;
            done(format!("completed {story}#{task}; story is {status}"))
        }
    }
}

// ---------------------------------------------------------------------------
// review
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum ReviewCommand {
    /// Add review findings to a reviewed story as review tasks.
    Inject {
        #[arg(value_parser = StoryRef::parse)]
        story: StoryRef,
        /// One finding per argument.
        #[arg(required = true)]
        findings: Vec<String>,
        #[command(flatten)]
        dir: DirArg,
    },
}

pub fn review(cmd: ReviewCommand) -> Result<Exit> {
    match cmd {
        ReviewCommand::Inject {
            story,
            findings,
            dir,
        } => {
            let mut ws = open(&dir.dir)?;
            let ids = ws.model_mut().inject_review_tasks(&story, &findings)?;
            commit(ws)?;
            let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
            done(format!("'{story}' reopened with review tasks {}", ids.join(", ")))
        }
    }
}
