// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow phase commands
//!
//! Commands: init, show, transition, reset, awaiting

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::Path;

use council_core::application::CouncilContext;
use council_core::domain::{AgentPhaseState, Clock, WorkflowPhase};

use super::{format_duration, format_timestamp, print_json};

#[derive(Subcommand)]
pub enum PhaseCommand {
    /// Create (or overwrite) an agent's phase state
    Init {
        /// Agent role, e.g. "writer"
        #[arg(value_name = "ROLE")]
        role: String,

        /// Starting phase
        #[arg(long, default_value = "skill_discovery")]
        phase: WorkflowPhase,
    },

    /// Show an agent's phase, approvals and history
    Show {
        #[arg(value_name = "ROLE")]
        role: String,

        /// Print the raw state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move an agent to another phase
    Transition {
        #[arg(value_name = "ROLE")]
        role: String,

        /// Target phase
        #[arg(value_name = "PHASE")]
        to: WorkflowPhase,

        /// Who or what requested the transition
        #[arg(long, value_name = "ID")]
        by: Option<String>,
    },

    /// Force an agent into a phase, discarding approvals
    Reset {
        #[arg(value_name = "ROLE")]
        role: String,

        #[arg(long, default_value = "skill_discovery")]
        to: WorkflowPhase,
    },

    /// List agents waiting for approval
    Awaiting,
}

pub async fn handle_command(command: PhaseCommand, ctx: &CouncilContext, project: &Path) -> Result<()> {
    match command {
        PhaseCommand::Init { role, phase } => init(ctx, project, &role, phase).await,
        PhaseCommand::Show { role, json } => show(ctx, project, &role, json).await,
        PhaseCommand::Transition { role, to, by } => {
            transition(ctx, project, &role, to, by.as_deref()).await
        }
        PhaseCommand::Reset { role, to } => reset(ctx, project, &role, to).await,
        PhaseCommand::Awaiting => awaiting(ctx, project).await,
    }
}

async fn init(ctx: &CouncilContext, project: &Path, role: &str, phase: WorkflowPhase) -> Result<()> {
    let state = ctx
        .phases
        .initialize_phase_state(project, role, phase)
        .await
        .context("Failed to initialize phase state")?;

    println!(
        "{}",
        format!("✓ {} initialized in {}", state.agent_role, state.current_phase).green()
    );
    Ok(())
}

async fn show(ctx: &CouncilContext, project: &Path, role: &str, json: bool) -> Result<()> {
    let Some(state) = ctx.phases.get_phase_state(project, role).await? else {
        println!("{}", format!("No phase state for '{}'", role).yellow());
        return Ok(());
    };

    if json {
        return print_json(&state);
    }

    print_state(&state, ctx.clock.now_millis());
    Ok(())
}

fn print_state(state: &AgentPhaseState, now: i64) {
    println!("{}", state.agent_role.bold());
    println!("  Phase: {}", state.current_phase.to_string().cyan());
    if let Some(previous) = state.previous_phase {
        println!("  Previous: {}", previous);
    }
    println!(
        "  In phase for: {}",
        format_duration(now - state.phase_start_time)
    );

    let approval = &state.approval;
    println!();
    println!("{}", "Approval:".bold());
    println!(
        "  Required: {}",
        if approval.required { "yes" } else { "no" }
    );
    for domain in approval.required_domains() {
        let entry = approval.approvals.get(&domain);
        match entry.filter(|entry| entry.granted) {
            Some(entry) => println!(
                "  {} {} by {} at {}",
                "✓".green(),
                domain,
                entry.granted_by.as_deref().unwrap_or("unknown"),
                entry
                    .granted_at
                    .map(format_timestamp)
                    .unwrap_or_else(|| "-".to_string())
            ),
            None => println!("  {} {} {}", "✗".red(), domain, "(pending)".dimmed()),
        }
    }

    if !state.transition_history.is_empty() {
        println!();
        println!("{}", "History:".bold());
        for transition in &state.transition_history {
            println!(
                "  {}  {} → {}  {}",
                format_timestamp(transition.timestamp).dimmed(),
                transition.from,
                transition.to,
                transition.triggered_by.as_deref().unwrap_or("").dimmed()
            );
        }
    }
}

async fn transition(
    ctx: &CouncilContext,
    project: &Path,
    role: &str,
    to: WorkflowPhase,
    by: Option<&str>,
) -> Result<()> {
    let result = ctx.phases.transition_phase(project, role, to, by).await?;

    if result.valid {
        println!("{}", format!("✓ {} → {}", role, to).green());
        Ok(())
    } else {
        anyhow::bail!(
            "Transition refused: {}",
            result.reason.unwrap_or_else(|| "unknown reason".to_string())
        )
    }
}

async fn reset(ctx: &CouncilContext, project: &Path, role: &str, to: WorkflowPhase) -> Result<()> {
    ctx.phases
        .reset_phase_state(project, role, to)
        .await
        .context("Failed to reset phase state")?;

    println!("{}", format!("✓ {} reset to {}", role, to).green());
    Ok(())
}

async fn awaiting(ctx: &CouncilContext, project: &Path) -> Result<()> {
    let roles = ctx.council.get_agents_awaiting_approval(project).await?;

    if roles.is_empty() {
        println!("{}", "No agents awaiting approval".yellow());
        return Ok(());
    }

    println!("{:<24} {}", "ROLE", "PENDING");
    for role in roles {
        let pending = ctx
            .council
            .get_agent_approval_status(project, &role)
            .await?
            .map(|status| {
                status
                    .pending_domains
                    .iter()
                    .map(|domain| domain.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        println!("{:<24} {}", role.bold(), pending);
    }
    Ok(())
}
