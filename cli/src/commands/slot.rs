// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Execution slot commands
//!
//! Commands: acquire, release, status, clear

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use council_core::application::{CouncilContext, SlotRequest};
use council_core::domain::concurrency::SlotReleaseReason;
use council_core::domain::config::ConcurrencyOverrides;
use council_core::domain::Clock;

use super::{format_duration, print_json};

#[derive(Subcommand)]
pub enum SlotCommand {
    /// Request an execution slot for an agent
    Acquire {
        #[arg(value_name = "ROLE")]
        role: String,

        /// Agent instance id
        #[arg(long, value_name = "ID")]
        agent_id: String,

        /// Block until a slot frees up (Ctrl+C to give up)
        #[arg(long)]
        wait: bool,

        /// Seconds between admission attempts while waiting
        #[arg(long, default_value = "5", value_name = "SECS")]
        poll_interval: u64,

        /// Override the configured concurrency limit for this request
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Override the configured slot timeout (seconds)
        #[arg(long, value_name = "SECS")]
        slot_timeout: Option<u64>,
    },

    /// Release a held slot
    Release {
        #[arg(value_name = "SLOT_ID")]
        slot_id: String,

        /// completed, failed, timeout, aborted or released
        #[arg(long, default_value = "released")]
        reason: SlotReleaseReason,
    },

    /// Show active slots and the wait queue
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Force-release every slot and empty the wait queue
    Clear {
        /// Required; this aborts bookkeeping for every running agent
        #[arg(long)]
        yes: bool,
    },
}

pub async fn handle_command(command: SlotCommand, ctx: &CouncilContext, project: &Path) -> Result<()> {
    match command {
        SlotCommand::Acquire {
            role,
            agent_id,
            wait,
            poll_interval,
            max_concurrent,
            slot_timeout,
        } => {
            let request = SlotRequest::new(role, agent_id).with_overrides(ConcurrencyOverrides {
                max_concurrent_agents: max_concurrent,
                max_queue_size: None,
                slot_timeout: slot_timeout.map(Duration::from_secs),
            });
            acquire(ctx, project, request, wait, Duration::from_secs(poll_interval.max(1))).await
        }
        SlotCommand::Release { slot_id, reason } => release(ctx, project, &slot_id, reason).await,
        SlotCommand::Status { json } => status(ctx, project, json).await,
        SlotCommand::Clear { yes } => clear(ctx, project, yes).await,
    }
}

async fn acquire(
    ctx: &CouncilContext,
    project: &Path,
    request: SlotRequest,
    wait: bool,
    poll_interval: Duration,
) -> Result<()> {
    let role = request.agent_role.clone();

    let slot = if wait {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, leaving the wait queue");
                on_interrupt.cancel();
            }
        });
        println!("Waiting for an execution slot for {}...", role.bold());
        ctx.concurrency
            .wait_for_slot(project, request, poll_interval, &cancel)
            .await
            .context("Failed to acquire execution slot")?
    } else {
        ctx.concurrency
            .acquire_slot(project, request)
            .await
            .context("Failed to acquire execution slot")?
    };

    match slot {
        Some(slot) => {
            println!("{}", format!("✓ Slot acquired for {}", role).green());
            println!("{}", slot.slot_id);
        }
        None if wait => println!("{}", "Gave up waiting for a slot".yellow()),
        None => {
            let waiting = ctx.concurrency.get_waiting_agents(project).await?;
            let position = waiting
                .iter()
                .position(|agent| agent.agent_role == role)
                .map(|index| index + 1);
            match position {
                Some(position) => println!(
                    "{}",
                    format!("⏳ No slot available; {} queued at position {}", role, position)
                        .yellow()
                ),
                None => println!("{}", "⏳ No slot available".yellow()),
            }
        }
    }
    Ok(())
}

async fn release(
    ctx: &CouncilContext,
    project: &Path,
    slot_id: &str,
    reason: SlotReleaseReason,
) -> Result<()> {
    match ctx.concurrency.release_slot(project, slot_id, reason).await? {
        Some(slot) => println!(
            "{}",
            format!("✓ Released slot held by {} ({})", slot.agent_role, reason).green()
        ),
        None => println!("{}", format!("Slot {} is not active", slot_id).yellow()),
    }
    Ok(())
}

async fn status(ctx: &CouncilContext, project: &Path, json: bool) -> Result<()> {
    let status = ctx.concurrency.get_concurrency_status(project).await?;
    let waiting = ctx.concurrency.get_waiting_agents(project).await?;

    if json {
        return print_json(&serde_json::json!({
            "status": status,
            "waiting": waiting,
        }));
    }

    let now = ctx.clock.now_millis();
    println!("{}", "Execution slots:".bold());
    println!(
        "  {} active / {} max, {} available, {} waiting",
        status.active, status.max_concurrent, status.available, status.waiting
    );

    if !status.active_slots.is_empty() {
        println!();
        println!("{:<38} {:<20} {:<20} {}", "SLOT", "ROLE", "AGENT", "HELD FOR");
        for slot in &status.active_slots {
            println!(
                "{:<38} {:<20} {:<20} {}",
                slot.slot_id,
                slot.agent_role.bold(),
                slot.agent_id,
                format_duration(now - slot.acquired_at)
            );
        }
    }

    if !waiting.is_empty() {
        println!();
        println!("{}", "Wait queue:".bold());
        for (index, agent) in waiting.iter().enumerate() {
            println!(
                "  {}. {} ({}) waiting {}",
                index + 1,
                agent.agent_role,
                agent.agent_id,
                format_duration(now - agent.enqueued_at)
            );
        }
    }
    Ok(())
}

async fn clear(ctx: &CouncilContext, project: &Path, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("Refusing to clear slots without --yes");
    }

    warn!(project = %project.display(), "Clearing all execution slots");
    let cleared = ctx.concurrency.clear_all_slots(project).await?;
    println!("{}", format!("✓ Cleared {} slot(s)", cleared).green());
    Ok(())
}
