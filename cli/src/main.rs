// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Council CLI
//!
//! The `council` binary drives the coordination core against one project
//! directory. Every invocation is a short-lived process; all state lives in
//! the project's JSON documents, so several shells (or several agents) can
//! run commands against the same project at once.
//!
//! ## Commands
//!
//! - `council phase init|show|transition|reset|awaiting` - Workflow phase state
//! - `council approve|reject|start` - Separation-of-powers signoff
//! - `council slot acquire|release|status|clear` - Execution slot admission
//! - `council qa submit|next|complete|status|clear` - Single-flight QA queue
//! - `council monitor check|recover|watch|register|stage|stats` - Timeouts
//! - `council cleanup` - Release everything an agent holds
//! - `council config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use council_core::application::CouncilContext;
use council_cli::commands::{
    self, ApproveArgs, CleanupArgs, ConfigCommand, MonitorCommand, PhaseCommand, QaCommand,
    RejectArgs, SlotCommand, StartArgs,
};

/// Council - coordinate autonomous agents on a shared project
#[derive(Parser)]
#[command(name = "council")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding the coordination documents
    #[arg(
        short,
        long,
        global = true,
        env = "COUNCIL_PROJECT_DIR",
        default_value = ".",
        value_name = "DIR"
    )]
    project: PathBuf,

    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "COUNCIL_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "COUNCIL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    #[command(flatten)]
    Project(ProjectCommand),
}

/// Commands that operate on the project's coordination state
#[derive(Subcommand)]
enum ProjectCommand {
    /// Workflow phase state
    #[command(name = "phase")]
    Phase {
        #[command(subcommand)]
        command: PhaseCommand,
    },

    /// Grant a domain's approval of an agent's plan
    #[command(name = "approve")]
    Approve(ApproveArgs),

    /// Reject an agent's plan and send it back to plan design
    #[command(name = "reject")]
    Reject(RejectArgs),

    /// Move an approved agent into execution
    #[command(name = "start")]
    Start(StartArgs),

    /// Execution slot management
    #[command(name = "slot")]
    Slot {
        #[command(subcommand)]
        command: SlotCommand,
    },

    /// QA validation queue
    #[command(name = "qa")]
    Qa {
        #[command(subcommand)]
        command: QaCommand,
    },

    /// Timeout monitoring and crash recovery
    #[command(name = "monitor")]
    Monitor {
        #[command(subcommand)]
        command: MonitorCommand,
    },

    /// Release every resource an agent holds
    #[command(name = "cleanup")]
    Cleanup(CleanupArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config, &cli.project).await
        }
        Some(Commands::Project(command)) => {
            let ctx = commands::load_context(cli.config, &cli.project)?;
            run_project_command(command, &ctx, &cli.project).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

async fn run_project_command(
    command: ProjectCommand,
    ctx: &CouncilContext,
    project: &Path,
) -> Result<()> {
    match command {
        ProjectCommand::Phase { command } => {
            commands::phase::handle_command(command, ctx, project).await
        }
        ProjectCommand::Approve(args) => commands::council::approve(args, ctx, project).await,
        ProjectCommand::Reject(args) => commands::council::reject(args, ctx, project).await,
        ProjectCommand::Start(args) => commands::council::start(args, ctx, project).await,
        ProjectCommand::Slot { command } => {
            commands::slot::handle_command(command, ctx, project).await
        }
        ProjectCommand::Qa { command } => commands::qa::handle_command(command, ctx, project).await,
        ProjectCommand::Monitor { command } => {
            commands::monitor::handle_command(command, ctx, project).await
        }
        ProjectCommand::Cleanup(args) => {
            commands::cleanup::handle_command(args, ctx, project).await
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}
