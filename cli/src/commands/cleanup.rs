// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent cleanup command

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use council_core::application::{CleanupReport, CouncilContext, StepOutcome};
use council_core::domain::CleanupReason;

#[derive(Args)]
pub struct CleanupArgs {
    #[arg(value_name = "ROLE")]
    pub role: String,

    #[arg(long, value_name = "ID")]
    pub agent_id: String,

    /// Execution slot held by the agent, if any
    #[arg(long, value_name = "SLOT_ID")]
    pub slot_id: Option<String>,

    /// completed, failed, timeout or aborted
    #[arg(long, default_value = "completed")]
    pub reason: CleanupReason,

    /// Deliverable (completed), error (failed) or abort reason (aborted)
    #[arg(long)]
    pub detail: Option<String>,

    /// How long the agent ran before timing out (timeout)
    #[arg(long, value_name = "SECS", default_value = "0")]
    pub elapsed_secs: i64,

    #[arg(long)]
    pub json: bool,
}

pub async fn handle_command(args: CleanupArgs, ctx: &CouncilContext, project: &Path) -> Result<()> {
    let lifecycle = &ctx.lifecycle;
    let (role, agent_id, slot_id) = (args.role.as_str(), args.agent_id.as_str(), args.slot_id);
    let detail = args.detail.as_deref();

    let report = match args.reason {
        CleanupReason::Completed => {
            lifecycle
                .cleanup_agent_on_completion(project, role, agent_id, slot_id, detail)
                .await
        }
        CleanupReason::Failed => {
            lifecycle
                .cleanup_agent_on_failure(
                    project,
                    role,
                    agent_id,
                    slot_id,
                    detail.unwrap_or("unspecified error"),
                )
                .await
        }
        CleanupReason::Timeout => {
            lifecycle
                .cleanup_agent_on_timeout(project, role, agent_id, slot_id, args.elapsed_secs * 1000)
                .await
        }
        CleanupReason::Aborted => {
            lifecycle
                .cleanup_agent_on_abort(
                    project,
                    role,
                    agent_id,
                    slot_id,
                    detail.unwrap_or("aborted by operator"),
                )
                .await
        }
    };

    if args.json {
        super::print_json(&report)?;
    } else {
        print_report(&report);
    }

    if !report.is_clean() {
        anyhow::bail!("{} cleanup step(s) failed", report.failed().len());
    }
    Ok(())
}

fn print_report(report: &CleanupReport) {
    println!(
        "{} ({})",
        format!("Cleanup of {}", report.agent_role).bold(),
        report.reason
    );
    for (step, outcome) in &report.steps {
        match outcome {
            StepOutcome::Succeeded => println!("  {} {}", "✓".green(), step),
            StepOutcome::Skipped(why) => {
                println!("  {} {} {}", "-".dimmed(), step, format!("({})", why).dimmed())
            }
            StepOutcome::Failed(error) => println!("  {} {}: {}", "✗".red(), step, error),
        }
    }
}
