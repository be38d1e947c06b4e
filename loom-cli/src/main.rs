//! Loom: workflow state and reconciliation CLI.
//!
//! # Usage
//!
//! ```text
//! loom init <dir> [--name <project>]
//! loom validate <dir> [--json]
//! loom update <dir> [--yes] [--allow-destructive] [--json]
//! loom migrate <dir> --from flat|standard --to flat|standard [--dry-run]
//! loom restore <dir> [--list] [--backup <file>]
//! loom status <dir> [--json]
//! loom feature create|activate <name> [-C <dir>]
//! loom epic create <feature> <epic> [-C <dir>]
//! loom story create|start|close <feature/epic/story> [-C <dir>]
//! loom task complete <feature/epic/story> <task> [--commit <id>] [-C <dir>]
//! loom review inject <feature/epic/story> <finding>... [-C <dir>]
//! ```
//!
//! Exit codes: `0` success, `1` error, `2` must-fix issues remain
//! unconfirmed, `3` reconciliation aborted.

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;

use commands::{
    init::InitArgs,
    migrate::MigrateArgs,
    restore::RestoreArgs,
    status::StatusArgs,
    update::UpdateArgs,
    validate::ValidateArgs,
    work::{EpicCommand, FeatureCommand, ReviewCommand, StoryCommand, TaskCommand},
    Exit,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "loom",
    version,
    about = "Keep a project's workflow state and structure in sync",
    long_about = None,
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the state document and scaffold a new project.
    Init(InitArgs),

    /// Report what is missing or inconsistent without changing anything.
    Validate(ValidateArgs),

    /// Validate, then apply the remediation plan until the project converges.
    Update(UpdateArgs),

    /// Move a project between the flat and standard layouts.
    Migrate(MigrateArgs),

    /// List or restore backups of the state document.
    Restore(RestoreArgs),

    /// Show the hierarchy and the current position.
    Status(StatusArgs),

    /// Create or activate features.
    Feature {
        #[command(subcommand)]
        command: FeatureCommand,
    },

    /// Create epics.
    Epic {
        #[command(subcommand)]
        command: EpicCommand,
    },

    /// Create, start and close stories.
    Story {
        #[command(subcommand)]
        command: StoryCommand,
    },

    /// Complete tasks.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Feed code review findings back into a story.
    Review {
        #[command(subcommand)]
        command: ReviewCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn dispatch(command: Commands) -> Result<Exit> {
    match command {
        Commands::Init(args) => args.run(),
        Commands::Validate(args) => args.run(),
        Commands::Update(args) => args.run(),
        Commands::Migrate(args) => args.run(),
        Commands::Restore(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Feature { command } => commands::work::feature(command),
        Commands::Epic { command } => commands::work::epic(command),
        Commands::Story { command } => commands::work::story(command),
        Commands::Task { command } => commands::work::task(command),
        Commands::Review { command } => commands::work::review(command),
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                Exit::Error.into()
            } else {
                Exit::Success.into()
            };
        }
    };
    init_tracing(cli.verbose);

    match dispatch(cli.command) {
        Ok(exit) => exit.into(),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            Exit::Error.into()
        }
    }
}
