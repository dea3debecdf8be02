// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Plan approval commands
//!
//! Commands: approve, reject, start

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use council_core::application::CouncilContext;
use council_core::domain::PowerDomain;

#[derive(Args)]
pub struct ApproveArgs {
    /// Agent role whose plan is approved
    #[arg(value_name = "ROLE")]
    pub role: String,

    /// Identity of the approver
    #[arg(long, value_name = "ID")]
    pub approver: String,

    /// Power domain granting the approval (planning, execution, quality)
    #[arg(long, default_value = "planning")]
    pub domain: PowerDomain,
}

#[derive(Args)]
pub struct RejectArgs {
    #[arg(value_name = "ROLE")]
    pub role: String,

    /// Why the plan was rejected
    #[arg(long)]
    pub reason: String,

    #[arg(long, value_name = "ID", default_value = "council")]
    pub rejecter: String,

    #[arg(long, default_value = "planning")]
    pub domain: PowerDomain,
}

#[derive(Args)]
pub struct StartArgs {
    #[arg(value_name = "ROLE")]
    pub role: String,

    /// Who or what started execution
    #[arg(long, value_name = "ID")]
    pub by: Option<String>,
}

pub async fn approve(args: ApproveArgs, ctx: &CouncilContext, project: &Path) -> Result<()> {
    let outcome = ctx
        .council
        .approve_agent_plan(project, &args.role, &args.approver, args.domain)
        .await?;

    if !outcome.accepted {
        anyhow::bail!("Approval refused: {}", outcome.message);
    }

    println!("{}", format!("✓ {}", outcome.message).green());
    if outcome.fully_approved {
        println!(
            "Run 'council start {}' to begin execution.",
            args.role
        );
    } else if let Some(status) = ctx
        .council
        .get_agent_approval_status(project, &args.role)
        .await?
    {
        let pending: Vec<String> = status
            .pending_domains
            .iter()
            .map(|domain| domain.to_string())
            .collect();
        println!("{}", format!("Still waiting on: {}", pending.join(", ")).yellow());
    }
    Ok(())
}

pub async fn reject(args: RejectArgs, ctx: &CouncilContext, project: &Path) -> Result<()> {
    let outcome = ctx
        .council
        .reject_agent_plan(project, &args.role, &args.reason, &args.rejecter, args.domain)
        .await?;

    if !outcome.accepted {
        anyhow::bail!("Rejection failed: {}", outcome.message);
    }

    println!("{}", format!("✓ {}", outcome.message).yellow());
    Ok(())
}

pub async fn start(args: StartArgs, ctx: &CouncilContext, project: &Path) -> Result<()> {
    let result = ctx
        .council
        .start_execution(project, &args.role, args.by.as_deref())
        .await?;

    if !result.valid {
        anyhow::bail!(
            "Cannot start execution: {}",
            result.reason.unwrap_or_else(|| "unknown reason".to_string())
        );
    }

    println!("{}", format!("✓ {} is executing", args.role).green());
    Ok(())
}
