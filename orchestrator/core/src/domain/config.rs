// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Council Configuration Types
//
// Defines the configuration schema for a coordination deployment, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Execution slot admission limits
// - QA queue capacity and validation timeout
// - Stage and agent timeout budgets for the timeout monitor
// - Lock retry/backoff tuning
// - Default approval routing for new agents
//
// Resolution order for a single setting is:
// explicit override > environment variable > config file > built-in default

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::approval::PowerDomain;
use crate::domain::phase::WorkflowPhase;

pub const CONFIG_PATH_ENV: &str = "COUNCIL_CONFIG_PATH";
pub const PROJECT_CONFIG_FILE: &str = "council-config.yaml";

/// Top-level Kubernetes-style council configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CouncilConfig")
    pub kind: String,

    #[serde(default)]
    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: CouncilConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            version: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CouncilConfig {
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub qa: QaQueueConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
}

/// Execution slot admission control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,
    #[serde(default = "default_queue_size")]
    pub max_queue_size: usize,
    /// Age after which an active slot is reclaimed (e.g. "30m")
    #[serde(with = "humantime_serde", default = "default_thirty_minutes")]
    pub slot_timeout: Duration,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            max_queue_size: default_queue_size(),
            slot_timeout: default_thirty_minutes(),
        }
    }
}

/// Per-call overrides; the highest precedence layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConcurrencyOverrides {
    pub max_concurrent_agents: Option<usize>,
    pub max_queue_size: Option<usize>,
    pub slot_timeout: Option<Duration>,
}

impl ConcurrencyOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn resolve(&self, base: &ConcurrencyConfig) -> ConcurrencyConfig {
        ConcurrencyConfig {
            max_concurrent_agents: self
                .max_concurrent_agents
                .unwrap_or(base.max_concurrent_agents),
            max_queue_size: self.max_queue_size.unwrap_or(base.max_queue_size),
            slot_timeout: self.slot_timeout.unwrap_or(base.slot_timeout),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaQueueConfig {
    #[serde(default = "default_queue_size")]
    pub max_queue_size: usize,
    /// Age after which the in-flight validation is force-completed as timeout
    #[serde(with = "humantime_serde", default = "default_thirty_minutes")]
    pub validation_timeout: Duration,
}

impl Default for QaQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_queue_size(),
            validation_timeout: default_thirty_minutes(),
        }
    }
}

/// Allowed duration per workflow stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTimeouts {
    #[serde(with = "humantime_serde", default = "default_thirty_minutes")]
    pub skill_discovery: Duration,
    #[serde(with = "humantime_serde", default = "default_requirement_timeout")]
    pub requirement: Duration,
    #[serde(with = "humantime_serde", default = "default_research_timeout")]
    pub skill_research: Duration,
    #[serde(with = "humantime_serde", default = "default_thirty_minutes")]
    pub plan_design: Duration,
    #[serde(with = "humantime_serde", default = "default_thirty_minutes")]
    pub awaiting_approval: Duration,
    #[serde(with = "humantime_serde", default = "default_execution_timeout")]
    pub execution: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            skill_discovery: default_thirty_minutes(),
            requirement: default_requirement_timeout(),
            skill_research: default_research_timeout(),
            plan_design: default_thirty_minutes(),
            awaiting_approval: default_thirty_minutes(),
            execution: default_execution_timeout(),
        }
    }
}

impl StageTimeouts {
    /// `None` for `completion`, which has no budget.
    pub fn for_phase(&self, phase: WorkflowPhase) -> Option<Duration> {
        match phase {
            WorkflowPhase::SkillDiscovery => Some(self.skill_discovery),
            WorkflowPhase::RequirementUnderstanding => Some(self.requirement),
            WorkflowPhase::SkillResearch => Some(self.skill_research),
            WorkflowPhase::PlanDesign => Some(self.plan_design),
            WorkflowPhase::AwaitingApproval => Some(self.awaiting_approval),
            WorkflowPhase::Execution => Some(self.execution),
            WorkflowPhase::Completion => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Overall ceiling on agent runtime regardless of stage
    #[serde(with = "humantime_serde", default = "default_thirty_minutes")]
    pub agent_timeout: Duration,
    /// Fraction of a budget after which a one-time warning is raised
    #[serde(default = "default_warning_ratio")]
    pub warning_ratio: f64,
    #[serde(default)]
    pub stages: StageTimeouts,
    /// Budget for stages with no table entry
    #[serde(with = "humantime_serde", default = "default_thirty_minutes")]
    pub default_stage_timeout: Duration,
    /// Period of the background monitor loop
    #[serde(with = "humantime_serde", default = "default_monitor_interval")]
    pub monitor_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            agent_timeout: default_thirty_minutes(),
            warning_ratio: default_warning_ratio(),
            stages: StageTimeouts::default(),
            default_stage_timeout: default_thirty_minutes(),
            monitor_interval: default_monitor_interval(),
        }
    }
}

impl TimeoutConfig {
    pub fn stage_timeout(&self, phase: WorkflowPhase) -> Duration {
        self.stages
            .for_phase(phase)
            .unwrap_or(self.default_stage_timeout)
    }
}

/// Cross-process lock tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_retries")]
    pub retries: u32,
    #[serde(with = "humantime_serde", default = "default_min_backoff")]
    pub min_backoff: Duration,
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,
    /// A lock file older than twice this is treated as abandoned
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub acquire_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retries: default_lock_retries(),
            min_backoff: default_min_backoff(),
            max_backoff: default_max_backoff(),
            acquire_timeout: default_max_backoff(),
        }
    }
}

impl LockConfig {
    pub fn stale_threshold(&self) -> Duration {
        self.acquire_timeout * 2
    }
}

/// Approval routing applied when an agent's phase state is initialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_primary_domain")]
    pub primary_domain: PowerDomain,
    #[serde(default = "default_required_signoffs")]
    pub required_signoffs: Vec<PowerDomain>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            primary_domain: default_primary_domain(),
            required_signoffs: default_required_signoffs(),
        }
    }
}

fn default_max_concurrent_agents() -> usize {
    3
}

fn default_queue_size() -> usize {
    10
}

fn default_thirty_minutes() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_requirement_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_research_timeout() -> Duration {
    Duration::from_secs(20 * 60)
}

fn default_execution_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_warning_ratio() -> f64 {
    0.8
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(3 * 60)
}

fn default_lock_retries() -> u32 {
    3
}

fn default_min_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_primary_domain() -> PowerDomain {
    PowerDomain::Planning
}

fn default_required_signoffs() -> Vec<PowerDomain> {
    vec![PowerDomain::Execution]
}

impl Default for CouncilConfigManifest {
    fn default() -> Self {
        Self {
            api_version: "100monkeys.ai/v1".to_string(),
            kind: "CouncilConfig".to_string(),
            metadata: ConfigMetadata::default(),
            spec: CouncilConfig::default(),
        }
    }
}

impl CouncilConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. COUNCIL_CONFIG_PATH environment variable
    /// 2. <project>/council-config.yaml
    /// 3. ~/.council/config.yaml (user home)
    /// 4. /etc/council/config.yaml (system, Unix)
    pub fn discover_config(project_dir: Option<&Path>) -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        if let Some(project_dir) = project_dir {
            let project_config = project_dir.join(PROJECT_CONFIG_FILE);
            if project_config.exists() {
                return Some(project_config);
            }
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".council").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/council/config.yaml");
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(
        cli_path: Option<PathBuf>,
        project_dir: Option<&Path>,
    ) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config(project_dir) {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::debug!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// injectable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let spec = &mut self.spec;

        if let Some(value) = parse_positive(&lookup, "COUNCIL_MAX_CONCURRENT") {
            spec.concurrency.max_concurrent_agents = value as usize;
        }
        if let Some(value) = parse_positive(&lookup, "COUNCIL_MAX_QUEUE_SIZE") {
            spec.concurrency.max_queue_size = value as usize;
        }
        if let Some(value) = parse_positive(&lookup, "COUNCIL_SLOT_TIMEOUT_SECS") {
            spec.concurrency.slot_timeout = Duration::from_secs(value);
        }
        if let Some(value) = parse_positive(&lookup, "COUNCIL_QA_VALIDATION_TIMEOUT_SECS") {
            spec.qa.validation_timeout = Duration::from_secs(value);
        }
        if let Some(value) = parse_positive(&lookup, "COUNCIL_AGENT_TIMEOUT_SECS") {
            spec.timeouts.agent_timeout = Duration::from_secs(value);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != "100monkeys.ai/v1" {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '100monkeys.ai/v1'",
                self.api_version
            );
        }

        if self.kind != "CouncilConfig" {
            anyhow::bail!("Invalid kind: '{}'. Must be 'CouncilConfig'", self.kind);
        }

        let spec = &self.spec;
        if spec.concurrency.max_concurrent_agents == 0 {
            anyhow::bail!("concurrency.max_concurrent_agents must be at least 1");
        }
        if spec.concurrency.slot_timeout.is_zero() {
            anyhow::bail!("concurrency.slot_timeout must be greater than zero");
        }
        if spec.qa.max_queue_size == 0 {
            anyhow::bail!("qa.max_queue_size must be at least 1");
        }
        if spec.qa.validation_timeout.is_zero() {
            anyhow::bail!("qa.validation_timeout must be greater than zero");
        }
        if spec.timeouts.agent_timeout.is_zero() {
            anyhow::bail!("timeouts.agent_timeout must be greater than zero");
        }
        if !(spec.timeouts.warning_ratio > 0.0 && spec.timeouts.warning_ratio < 1.0) {
            anyhow::bail!(
                "timeouts.warning_ratio must be between 0 and 1 (exclusive), got {}",
                spec.timeouts.warning_ratio
            );
        }
        if spec.timeouts.monitor_interval.is_zero() {
            anyhow::bail!("timeouts.monitor_interval must be greater than zero");
        }
        if spec.lock.min_backoff > spec.lock.max_backoff {
            anyhow::bail!("lock.min_backoff cannot exceed lock.max_backoff");
        }
        if spec.lock.acquire_timeout.is_zero() {
            anyhow::bail!("lock.acquire_timeout must be greater than zero");
        }

        Ok(())
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => {
            tracing::info!("Environment override: {}={}", key, value);
            Some(value)
        }
        _ => {
            tracing::warn!(
                "Invalid value for {}: '{}'. Expected a positive integer. Ignoring.",
                key,
                raw
            );
            None
        }
    }
}
