// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! QA validation queue commands
//!
//! Commands: submit, next, complete, status, clear

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::Path;

use council_core::application::{CouncilContext, NewSubmission};
use council_core::domain::qa::QaResult;
use council_core::domain::Clock;

use super::{format_duration, format_timestamp, print_json};

#[derive(Subcommand)]
pub enum QaCommand {
    /// Submit a deliverable for validation
    Submit {
        #[arg(value_name = "ROLE")]
        role: String,

        #[arg(long, value_name = "ID")]
        agent_id: String,

        /// Path or description of the deliverable
        #[arg(long)]
        deliverable: String,

        /// Higher values are validated first
        #[arg(long)]
        priority: Option<i32>,
    },

    /// Start validating the next submission
    Next,

    /// Finish the in-flight validation
    Complete {
        /// Mark the deliverable as passed
        #[arg(long, conflicts_with = "failed", required_unless_present = "failed")]
        passed: bool,

        /// Return the deliverable for fixes
        #[arg(long)]
        failed: bool,

        #[arg(long)]
        feedback: Option<String>,
    },

    /// Show the queue, the in-flight validation and recent history
    Status {
        #[arg(long)]
        json: bool,

        /// History entries to show
        #[arg(long, default_value = "5")]
        history: usize,
    },

    /// Drop all pending submissions and the in-flight validation
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

pub async fn handle_command(command: QaCommand, ctx: &CouncilContext, project: &Path) -> Result<()> {
    match command {
        QaCommand::Submit {
            role,
            agent_id,
            deliverable,
            priority,
        } => {
            let mut submission = NewSubmission::new(role, agent_id, deliverable);
            if let Some(priority) = priority {
                submission = submission.with_priority(priority);
            }
            submit(ctx, project, submission).await
        }
        QaCommand::Next => next(ctx, project).await,
        QaCommand::Complete {
            passed, feedback, ..
        } => complete(ctx, project, passed, feedback).await,
        QaCommand::Status { json, history } => status(ctx, project, json, history).await,
        QaCommand::Clear { yes } => clear(ctx, project, yes).await,
    }
}

async fn submit(ctx: &CouncilContext, project: &Path, submission: NewSubmission) -> Result<()> {
    let role = submission.agent_role.clone();
    let position = ctx.council.submit_to_qa(project, submission).await?;

    println!(
        "{}",
        format!("✓ {} queued for QA at position {}", role, position).green()
    );
    Ok(())
}

async fn next(ctx: &CouncilContext, project: &Path) -> Result<()> {
    match ctx.council.process_next_qa_submission(project).await? {
        Some(submission) => {
            println!(
                "{}",
                format!("✓ Validating {} from {}", submission.deliverable, submission.agent_role)
                    .green()
            );
        }
        None => {
            let status = ctx.qa.queue_status(project).await?;
            match status.current {
                Some(current) => println!(
                    "{}",
                    format!("A validation is already in progress ({})", current.agent_role)
                        .yellow()
                ),
                None => println!("{}", "QA queue is empty".yellow()),
            }
        }
    }
    Ok(())
}

async fn complete(
    ctx: &CouncilContext,
    project: &Path,
    passed: bool,
    feedback: Option<String>,
) -> Result<()> {
    match ctx
        .council
        .complete_qa_validation(project, passed, feedback)
        .await?
    {
        Some(entry) if entry.result == QaResult::Passed => println!(
            "{}",
            format!("✓ {} passed QA", entry.submission.agent_role).green()
        ),
        Some(entry) => println!(
            "{}",
            format!("✗ {} returned for fixes", entry.submission.agent_role).red()
        ),
        None => println!("{}", "No validation in progress".yellow()),
    }
    Ok(())
}

async fn status(ctx: &CouncilContext, project: &Path, json: bool, history_limit: usize) -> Result<()> {
    let status = ctx.qa.queue_status(project).await?;
    let pending = ctx.qa.pending_submissions(project).await?;
    let history = ctx.qa.history(project).await?;
    let recent: Vec<_> = history.iter().rev().take(history_limit).collect();

    if json {
        return print_json(&serde_json::json!({
            "status": status,
            "pending": pending,
            "history": recent,
        }));
    }

    let now = ctx.clock.now_millis();
    println!("{}", "QA queue:".bold());
    match &status.current {
        Some(current) => println!(
            "  In progress: {} ({}) for {}",
            current.agent_role.bold(),
            current.deliverable,
            format_duration(status.current_elapsed.unwrap_or_default())
        ),
        None => println!("  In progress: {}", "(none)".dimmed()),
    }

    if pending.is_empty() {
        println!("  Pending: {}", "(none)".dimmed());
    } else {
        println!("  Pending:");
        for (index, submission) in pending.iter().enumerate() {
            println!(
                "    {}. {} ({}) priority {} waiting {}",
                index + 1,
                submission.agent_role,
                submission.deliverable,
                submission.effective_priority(),
                format_duration(now - submission.submitted_at)
            );
        }
    }

    if !recent.is_empty() {
        println!();
        println!("{}", "Recent results:".bold());
        for entry in recent {
            let result = match entry.result {
                QaResult::Passed => entry.result.to_string().green(),
                QaResult::Failed => entry.result.to_string().red(),
                QaResult::Timeout => entry.result.to_string().yellow(),
            };
            println!(
                "  {}  {:<20} {}",
                format_timestamp(entry.completed_at).dimmed(),
                entry.submission.agent_role,
                result
            );
        }
    }
    Ok(())
}

async fn clear(ctx: &CouncilContext, project: &Path, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("Refusing to clear the QA queue without --yes");
    }

    ctx.qa.clear_queue(project).await?;
    println!("{}", "✓ QA queue cleared".green());
    Ok(())
}
