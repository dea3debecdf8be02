// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use council_core::domain::config::{CouncilConfigManifest, CONFIG_PATH_ENV, PROJECT_CONFIG_FILE};
use council_core::domain::WorkflowPhase;

const SAMPLE_CONFIG: &str = include_str!("../../templates/council-config.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./council-config.yaml)
        #[arg(short, long, default_value = "./council-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
    project: &Path,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, project, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override), project).await,
        ConfigCommand::Generate { output, force } => generate(output, force).await,
    }
}

async fn show(
    config_override: Option<PathBuf>,
    project: &Path,
    show_paths: bool,
    as_yaml: bool,
) -> Result<()> {
    let manifest = CouncilConfigManifest::load_or_default(config_override.clone(), Some(project))
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. {}", project.join(PROJECT_CONFIG_FILE).display());
        println!("  4. ~/.council/config.yaml");
        println!("  5. /etc/council/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&manifest)?);
        return Ok(());
    }

    let spec = &manifest.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", manifest.metadata.name);
    println!();

    println!("{}", "Concurrency:".bold());
    println!("  Max concurrent agents: {}", spec.concurrency.max_concurrent_agents);
    println!("  Max wait queue: {}", spec.concurrency.max_queue_size);
    println!(
        "  Slot timeout: {}",
        humanize(spec.concurrency.slot_timeout)
    );
    println!();

    println!("{}", "QA queue:".bold());
    println!("  Max queue: {}", spec.qa.max_queue_size);
    println!("  Validation timeout: {}", humanize(spec.qa.validation_timeout));
    println!();

    println!("{}", "Timeouts:".bold());
    println!("  Agent: {}", humanize(spec.timeouts.agent_timeout));
    println!("  Warning at: {:.0}%", spec.timeouts.warning_ratio * 100.0);
    println!("  Monitor interval: {}", humanize(spec.timeouts.monitor_interval));
    for phase in WorkflowPhase::ALL {
        if phase.is_terminal() {
            continue;
        }
        println!(
            "    {:<20} {}",
            phase.as_str(),
            humanize(spec.timeouts.stage_timeout(phase))
        );
    }
    println!();

    println!("{}", "Approval:".bold());
    println!("  Primary domain: {}", spec.approval.primary_domain);
    let signoffs: Vec<String> = spec
        .approval
        .required_signoffs
        .iter()
        .map(|domain| domain.to_string())
        .collect();
    println!(
        "  Required signoffs: {}",
        if signoffs.is_empty() {
            "(none)".to_string()
        } else {
            signoffs.join(", ")
        }
    );
    println!();

    Ok(())
}

fn humanize(duration: std::time::Duration) -> String {
    super::format_duration(duration.as_millis() as i64)
}

async fn validate(config_path: Option<PathBuf>, project: &Path) -> Result<()> {
    println!("Validating configuration...");

    let config = CouncilConfigManifest::load_or_default(config_path, Some(project))
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite",
            output.display()
        );
    }

    std::fs::write(&output, SAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_is_valid() {
        let manifest = CouncilConfigManifest::from_yaml_str(SAMPLE_CONFIG).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.spec.concurrency.max_concurrent_agents, 3);
        assert_eq!(
            manifest.spec.timeouts.stage_timeout(WorkflowPhase::Execution),
            std::time::Duration::from_secs(3600)
        );
    }

    #[tokio::test]
    async fn test_generate_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("council-config.yaml");
        std::fs::write(&output, "existing").unwrap();

        assert!(generate(output.clone(), false).await.is_err());
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "existing");

        generate(output.clone(), true).await.unwrap();
        assert!(std::fs::read_to_string(&output).unwrap().contains("CouncilConfig"));
    }
}
