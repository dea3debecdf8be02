// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Timeout monitor commands
//!
//! Commands: check, recover, watch, register, stage, stats
//!
//! Timers live in the process that runs the monitor, so every command that
//! reads them first rebuilds them from `agent-status.json`.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use council_core::application::{CouncilContext, RecoveryReport};
use council_core::domain::events::CoordinationEvent;
use council_core::domain::timeout::{TimeoutEventKind, TimeoutReport};
use council_core::domain::WorkflowPhase;
use council_core::infrastructure::EventBusError;

use super::{format_duration, print_json};

#[derive(Subcommand)]
pub enum MonitorCommand {
    /// Rebuild timers and run one timeout scan
    Check {
        #[arg(long)]
        json: bool,
    },

    /// Rebuild timers from persisted state and report crash-time timeouts
    Recover {
        #[arg(long)]
        json: bool,
    },

    /// Scan periodically until interrupted (Ctrl+C)
    Watch,

    /// Start the agent and stage timers for an agent
    Register {
        #[arg(value_name = "ROLE")]
        role: String,

        #[arg(long, value_name = "ID")]
        agent_id: String,

        /// Stage the agent is entering
        #[arg(long, default_value = "skill_discovery")]
        stage: WorkflowPhase,
    },

    /// Move an agent's stage timer to a new stage
    Stage {
        #[arg(value_name = "ROLE")]
        role: String,

        #[arg(value_name = "STAGE")]
        stage: WorkflowPhase,
    },

    /// Show live timers
    Stats {
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(command: MonitorCommand, ctx: &CouncilContext, project: &Path) -> Result<()> {
    match command {
        MonitorCommand::Check { json } => check(ctx, project, json).await,
        MonitorCommand::Recover { json } => recover(ctx, project, json).await,
        MonitorCommand::Watch => watch(ctx, project).await,
        MonitorCommand::Register {
            role,
            agent_id,
            stage,
        } => register(ctx, project, &role, &agent_id, stage).await,
        MonitorCommand::Stage { role, stage } => update_stage(ctx, project, &role, stage).await,
        MonitorCommand::Stats { json } => stats(ctx, project, json).await,
    }
}

async fn recover(ctx: &CouncilContext, project: &Path, json: bool) -> Result<()> {
    let report = ctx
        .monitor
        .initialize_monitor(project)
        .await
        .context("Failed to restore timers")?;

    if json {
        return print_json(&report);
    }

    print_recovery(&report);
    Ok(())
}

fn print_recovery(report: &RecoveryReport) {
    println!(
        "{}",
        format!(
            "✓ Restored {} agent timer(s) and {} stage timer(s)",
            report.restored_agents.len(),
            report.restored_stages.len()
        )
        .green()
    );
    for role in &report.restored_agents {
        println!("  {}", role);
    }
    if !report.approaching.is_empty() {
        println!();
        println!("{}", "Approaching timeout:".yellow().bold());
        for finding in &report.approaching {
            print_report(finding);
        }
    }
    if !report.timed_out_during_crash.is_empty() {
        println!();
        println!("{}", "Timed out while unmonitored:".red().bold());
        for timeout in &report.timed_out_during_crash {
            print_report(timeout);
        }
    }
}

/// Rebuilds timers and scans once. Timers restored past the warning ratio
/// are marked warned by the rebuild, so they are reported from the recovery.
async fn collect_findings(ctx: &CouncilContext, project: &Path) -> Result<Vec<TimeoutReport>> {
    let recovery = ctx.monitor.initialize_monitor(project).await?;
    debug!(
        restored = recovery.restored_agents.len(),
        approaching = recovery.approaching.len(),
        "Timers rebuilt for check"
    );
    let mut reports = recovery.approaching;
    reports.extend(recovery.timed_out_during_crash);
    reports.extend(ctx.monitor.check_all(project).await?);
    Ok(reports)
}

async fn check(ctx: &CouncilContext, project: &Path, json: bool) -> Result<()> {
    let reports = collect_findings(ctx, project).await?;
    info!(findings = reports.len(), "Timeout check complete");

    if json {
        return print_json(&reports);
    }

    if reports.is_empty() {
        println!("{}", "✓ No timeouts".green());
        return Ok(());
    }

    for report in &reports {
        print_report(report);
    }
    Ok(())
}

fn print_report(report: &TimeoutReport) {
    let label = match report.kind {
        TimeoutEventKind::ApproachingTimeout => "⚠ approaching".yellow(),
        TimeoutEventKind::StageTimedOut => "✗ stage timeout".red(),
        TimeoutEventKind::AgentTimedOut => "✗ agent timeout".red(),
        TimeoutEventKind::DetectedAfterCrash => "✗ timed out during crash".red(),
    };
    let scope = report
        .stage
        .map(|stage| format!(" [{}]", stage))
        .unwrap_or_default();
    println!(
        "  {} {}{}: {} of {}",
        label,
        report.agent_role.bold(),
        scope,
        format_duration(report.elapsed_ms),
        format_duration(report.timeout_ms)
    );
}

async fn watch(ctx: &CouncilContext, project: &Path) -> Result<()> {
    let recovery = ctx.monitor.initialize_monitor(project).await?;
    print_recovery(&recovery);

    let cancel = CancellationToken::new();
    let mut events = ctx.event_bus.subscribe();
    let handle = ctx
        .monitor
        .clone()
        .start(project.to_path_buf(), cancel.clone());

    println!(
        "Watching {} every {}s (Ctrl+C to stop)",
        project.display(),
        ctx.monitor.config().monitor_interval.as_secs()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(CoordinationEvent::Timeout { report, .. }) => print_report(&report),
                Ok(_) | Err(EventBusError::Lagged(_)) => {}
                Err(_) => break,
            },
        }
    }

    info!("Stopping timeout monitor");
    cancel.cancel();
    handle.await.context("Timeout monitor task failed")?;
    println!("{}", "✓ Monitor stopped".green());
    Ok(())
}

async fn register(
    ctx: &CouncilContext,
    project: &Path,
    role: &str,
    agent_id: &str,
    stage: WorkflowPhase,
) -> Result<()> {
    ctx.council
        .register_agent_for_monitoring(project, role, agent_id, stage)
        .await?;

    println!(
        "{}",
        format!("✓ Monitoring {} ({}) in {}", role, agent_id, stage).green()
    );
    Ok(())
}

async fn update_stage(ctx: &CouncilContext, project: &Path, role: &str, stage: WorkflowPhase) -> Result<()> {
    ctx.monitor.initialize_monitor(project).await?;
    ctx.council.update_agent_stage(project, role, stage).await?;

    println!("{}", format!("✓ {} entered stage {}", role, stage).green());
    Ok(())
}

async fn stats(ctx: &CouncilContext, project: &Path, json: bool) -> Result<()> {
    ctx.monitor.initialize_monitor(project).await?;
    let stats = ctx.monitor.get_monitor_stats();
    let stages = ctx.monitor.get_active_stages(project);

    if json {
        return print_json(&serde_json::json!({
            "stats": stats,
            "activeStages": stages,
        }));
    }

    println!("{}", "Timeout monitor:".bold());
    println!("  Agent timers: {}", stats.active_agents);
    println!("  Stage timers: {}", stats.active_stages);

    if !stages.is_empty() {
        println!();
        println!("{:<24} {:<20} {:<12} {}", "ROLE", "STAGE", "ELAPSED", "BUDGET");
        for stage in stages {
            let elapsed = format_duration(stage.elapsed_ms);
            println!(
                "{:<24} {:<20} {:<12} {}",
                stage.agent_role.bold(),
                stage.stage.to_string(),
                if stage.warned {
                    elapsed.yellow().to_string()
                } else {
                    elapsed
                },
                format_duration(stage.timeout_ms)
            );
        }
    }
    Ok(())
}
