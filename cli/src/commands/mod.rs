// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the council CLI

pub mod cleanup;
pub mod config;
pub mod council;
pub mod monitor;
pub mod phase;
pub mod qa;
pub mod slot;

pub use self::cleanup::CleanupArgs;
pub use self::config::ConfigCommand;
pub use self::council::{ApproveArgs, RejectArgs, StartArgs};
pub use self::monitor::MonitorCommand;
pub use self::phase::PhaseCommand;
pub use self::qa::QaCommand;
pub use self::slot::SlotCommand;

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use std::path::{Path, PathBuf};
use tracing::debug;

use council_core::application::CouncilContext;
use council_core::domain::config::CouncilConfigManifest;

/// Loads and validates the configuration, then wires the services.
pub fn load_context(config_path: Option<PathBuf>, project: &Path) -> Result<CouncilContext> {
    if !project.is_dir() {
        anyhow::bail!("Project directory {:?} does not exist", project);
    }

    let manifest = CouncilConfigManifest::load_or_default(config_path, Some(project))
        .context("Failed to load configuration")?;
    manifest
        .validate()
        .context("Configuration validation failed")?;
    debug!(
        project = %project.display(),
        max_concurrent = manifest.spec.concurrency.max_concurrent_agents,
        "Loaded council configuration"
    );

    Ok(CouncilContext::new(manifest.spec))
}

/// Epoch milliseconds as local wall-clock time.
pub(crate) fn format_timestamp(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => millis.to_string(),
    }
}

/// Milliseconds as `1h 02m 03s`.
pub(crate) fn format_duration(millis: i64) -> String {
    let total = millis.max(0) / 1000;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
