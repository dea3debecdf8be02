// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Timer model for the timeout monitor.
//!
//! Two tracks per agent, both keyed by `(project, agentRole)`: an overall
//! agent timer and the timer of the stage the agent is currently in. Elapsed
//! time is always `now - startTime` where `startTime` is the persisted anchor,
//! so a timer rebuilt after a restart keeps its original deadline.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::clock::EpochMillis;
use crate::domain::phase::WorkflowPhase;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub project: PathBuf,
    pub agent_role: String,
}

impl TimerKey {
    pub fn new(project: impl AsRef<Path>, agent_role: impl Into<String>) -> Self {
        Self {
            project: project.as_ref().to_path_buf(),
            agent_role: agent_role.into(),
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project.display(), self.agent_role)
    }
}

/// Where a timer stands relative to its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCheck {
    Ok,
    /// Crossed the warning ratio for the first time.
    Warning,
    TimedOut,
}

fn warning_threshold(timeout_ms: i64, warning_ratio: f64) -> i64 {
    (timeout_ms as f64 * warning_ratio) as i64
}

/// Shared budget arithmetic. `warned` flips false → true at most once.
fn evaluate(
    start_time: EpochMillis,
    timeout_ms: i64,
    warned: &mut bool,
    now: EpochMillis,
    warning_ratio: f64,
) -> TimerCheck {
    let elapsed = now - start_time;
    if elapsed > timeout_ms {
        return TimerCheck::TimedOut;
    }
    if !*warned && elapsed >= warning_threshold(timeout_ms, warning_ratio) {
        *warned = true;
        return TimerCheck::Warning;
    }
    TimerCheck::Ok
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentTimer {
    pub agent_id: String,
    pub agent_role: String,
    pub start_time: EpochMillis,
    pub timeout_ms: i64,
    pub restart_count: u32,
    pub warned: bool,
}

impl AgentTimer {
    /// Rebuilds a timer from its persisted anchor, pre-setting `warned` if the
    /// warning threshold was already crossed.
    pub fn restored(
        agent_id: String,
        agent_role: String,
        start_time: EpochMillis,
        timeout_ms: i64,
        restart_count: u32,
        now: EpochMillis,
        warning_ratio: f64,
    ) -> Self {
        Self {
            warned: now - start_time >= warning_threshold(timeout_ms, warning_ratio),
            agent_id,
            agent_role,
            start_time,
            timeout_ms,
            restart_count,
        }
    }

    pub fn elapsed(&self, now: EpochMillis) -> i64 {
        now - self.start_time
    }

    pub fn deadline(&self) -> EpochMillis {
        self.start_time + self.timeout_ms
    }

    pub fn check(&mut self, now: EpochMillis, warning_ratio: f64) -> TimerCheck {
        evaluate(self.start_time, self.timeout_ms, &mut self.warned, now, warning_ratio)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageTimer {
    pub stage: WorkflowPhase,
    pub start_time: EpochMillis,
    pub timeout_ms: i64,
    pub warned: bool,
    pub agent_id: Option<String>,
}

impl StageTimer {
    pub fn restored(
        stage: WorkflowPhase,
        start_time: EpochMillis,
        timeout_ms: i64,
        agent_id: Option<String>,
        now: EpochMillis,
        warning_ratio: f64,
    ) -> Self {
        Self {
            warned: now - start_time >= warning_threshold(timeout_ms, warning_ratio),
            stage,
            start_time,
            timeout_ms,
            agent_id,
        }
    }

    pub fn elapsed(&self, now: EpochMillis) -> i64 {
        now - self.start_time
    }

    pub fn deadline(&self) -> EpochMillis {
        self.start_time + self.timeout_ms
    }

    pub fn check(&mut self, now: EpochMillis, warning_ratio: f64) -> TimerCheck {
        evaluate(self.start_time, self.timeout_ms, &mut self.warned, now, warning_ratio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutEventKind {
    ApproachingTimeout,
    StageTimedOut,
    AgentTimedOut,
    DetectedAfterCrash,
}

impl fmt::Display for TimeoutEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeoutEventKind::ApproachingTimeout => "approaching_timeout",
            TimeoutEventKind::StageTimedOut => "stage_timed_out",
            TimeoutEventKind::AgentTimedOut => "agent_timed_out",
            TimeoutEventKind::DetectedAfterCrash => "detected_after_crash",
        };
        f.write_str(s)
    }
}

/// Timeout event as recorded under an agent's `timeoutEvents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutEventRecord {
    pub kind: TimeoutEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<WorkflowPhase>,
    pub elapsed: i64,
    pub timeout: i64,
    pub at: EpochMillis,
}

/// A finding from a monitor scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutReport {
    pub agent_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub kind: TimeoutEventKind,
    /// `None` for the agent-level track.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<WorkflowPhase>,
    pub elapsed_ms: i64,
    pub timeout_ms: i64,
    pub restart_count: u32,
}

impl TimeoutReport {
    pub fn elapsed_minutes(&self) -> i64 {
        self.elapsed_ms / 60_000
    }

    pub fn to_record(&self, at: EpochMillis) -> TimeoutEventRecord {
        TimeoutEventRecord {
            kind: self.kind,
            stage: self.stage,
            elapsed: self.elapsed_ms,
            timeout: self.timeout_ms,
            at,
        }
    }
}

/// An active stage as listed for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveStage {
    pub agent_role: String,
    pub stage: WorkflowPhase,
    pub elapsed_ms: i64,
    pub timeout_ms: i64,
    pub warned: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    pub active_agents: usize,
    pub active_stages: usize,
}

/// In-memory cache of live timers. Never authoritative; rebuilt from
/// `agent-status.json` on startup.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    agents: HashMap<TimerKey, AgentTimer>,
    stages: HashMap<TimerKey, StageTimer>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_agent(&mut self, key: TimerKey, timer: AgentTimer) -> Option<AgentTimer> {
        self.agents.insert(key, timer)
    }

    pub fn insert_stage(&mut self, key: TimerKey, timer: StageTimer) -> Option<StageTimer> {
        self.stages.insert(key, timer)
    }

    pub fn remove_agent(&mut self, key: &TimerKey) -> Option<AgentTimer> {
        self.agents.remove(key)
    }

    pub fn remove_stage(&mut self, key: &TimerKey) -> Option<StageTimer> {
        self.stages.remove(key)
    }

    pub fn agent(&self, key: &TimerKey) -> Option<&AgentTimer> {
        self.agents.get(key)
    }

    pub fn stage(&self, key: &TimerKey) -> Option<&StageTimer> {
        self.stages.get(key)
    }

    pub fn agents_mut_in<'a>(
        &'a mut self,
        project: &'a Path,
    ) -> impl Iterator<Item = (&'a TimerKey, &'a mut AgentTimer)> + 'a {
        self.agents.iter_mut().filter(move |(k, _)| k.project == project)
    }

    pub fn stages_mut_in<'a>(
        &'a mut self,
        project: &'a Path,
    ) -> impl Iterator<Item = (&'a TimerKey, &'a mut StageTimer)> + 'a {
        self.stages.iter_mut().filter(move |(k, _)| k.project == project)
    }

    pub fn stages_in<'a>(
        &'a self,
        project: &'a Path,
    ) -> impl Iterator<Item = (&'a TimerKey, &'a StageTimer)> + 'a {
        self.stages.iter().filter(move |(k, _)| k.project == project)
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            active_agents: self.agents.len(),
            active_stages: self.stages.len(),
        }
    }

    pub fn clear_project(&mut self, project: &Path) {
        self.agents.retain(|k, _| k.project != project);
        self.stages.retain(|k, _| k.project != project);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60_000;

    #[test]
    fn test_warning_fires_exactly_once() {
        let mut timer = StageTimer {
            stage: WorkflowPhase::SkillResearch,
            start_time: 0,
            timeout_ms: 10 * MIN,
            warned: false,
            agent_id: None,
        };

        let mut warnings = 0;
        for minute in 0..=10 {
            if timer.check(minute * MIN, 0.8) == TimerCheck::Warning {
                warnings += 1;
                assert_eq!(minute, 8);
            }
        }
        assert_eq!(warnings, 1);
        assert!(timer.warned);
        assert_eq!(timer.check(10 * MIN + 1, 0.8), TimerCheck::TimedOut);
    }

    #[test]
    fn test_restored_timer_keeps_original_deadline() {
        let t0 = 1_000_000;
        let timer = AgentTimer::restored(
            "vp-1".to_string(),
            "Video Producer".to_string(),
            t0,
            1_800_000,
            1,
            t0 + 1_700_000,
            0.8,
        );
        assert!(timer.warned);
        assert_eq!(timer.deadline(), t0 + 1_800_000);
        assert_eq!(timer.elapsed(t0 + 1_850_000), 1_850_000);
    }

    #[test]
    fn test_restored_timer_below_threshold_is_not_warned() {
        let timer = StageTimer::restored(WorkflowPhase::Execution, 0, 60 * MIN, None, 10 * MIN, 0.8);
        assert!(!timer.warned);
    }

    #[test]
    fn test_timed_out_without_prior_warning() {
        let mut timer = AgentTimer::restored("a".into(), "r".into(), 0, MIN, 0, 0, 0.8);
        assert_eq!(timer.check(2 * MIN, 0.8), TimerCheck::TimedOut);
    }

    #[test]
    fn test_registry_is_scoped_by_project() {
        let mut registry = TimerRegistry::new();
        let a = TimerKey::new("/p1", "writer");
        let b = TimerKey::new("/p2", "writer");
        for key in [&a, &b] {
            registry.insert_stage(
                key.clone(),
                StageTimer::restored(WorkflowPhase::PlanDesign, 0, MIN, None, 0, 0.8),
            );
        }
        assert_eq!(registry.stages_in(Path::new("/p1")).count(), 1);
        registry.clear_project(Path::new("/p1"));
        assert!(registry.stage(&a).is_none());
        assert!(registry.stage(&b).is_some());
        assert_eq!(a.to_string(), "/p1:writer");
    }
}
