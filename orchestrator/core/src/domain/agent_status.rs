// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Status Document
//!
//! Typed view of `agent-status.json`, the shared per-project document that
//! holds each agent's externally visible status, its phase state and the
//! timestamps the timeout monitor recovers from.
//!
//! Other tools write to this file too, so every record keeps unknown keys in
//! a flattened `extra` map and round-trips them untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::clock::EpochMillis;
use crate::domain::concurrency::SlotReleaseReason;
use crate::domain::phase::{AgentPhaseState, WorkflowPhase};
use crate::domain::timeout::TimeoutEventRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Running,
    PendingVerification,
    UnderVerification,
    Verified,
    Paused,
    ReturnedForFix,
    Completed,
    Failed,
    Timeout,
    Aborted,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Running => "RUNNING",
            AgentStatus::PendingVerification => "PENDING_VERIFICATION",
            AgentStatus::UnderVerification => "UNDER_VERIFICATION",
            AgentStatus::Verified => "VERIFIED",
            AgentStatus::Paused => "PAUSED",
            AgentStatus::ReturnedForFix => "RETURNED_FOR_FIX",
            AgentStatus::Completed => "COMPLETED",
            AgentStatus::Failed => "FAILED",
            AgentStatus::Timeout => "TIMEOUT",
            AgentStatus::Aborted => "ABORTED",
        }
    }

    /// Statuses whose timers are rebuilt after a monitor restart.
    pub fn is_monitored(&self) -> bool {
        matches!(self, AgentStatus::Running | AgentStatus::PendingVerification)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted anchors for the timeout monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<WorkflowPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_start_time: Option<EpochMillis>,
    /// Stage budget in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_timeout: Option<i64>,
    /// Agent budget in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_timed_out_at: Option<EpochMillis>,
}

impl TimeoutState {
    pub fn clear_stage(&mut self) {
        self.stage = None;
        self.stage_start_time = None;
        self.stage_timeout = None;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_state: Option<AgentPhaseState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_state: Option<TimeoutState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_start_time: Option<EpochMillis>,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeout_events: Vec<TimeoutEventRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<EpochMillis>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `agent-status.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusDocument {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentRecord>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AgentStatusDocument {
    pub fn agent(&self, agent_role: &str) -> Option<&AgentRecord> {
        self.agents.get(agent_role)
    }

    /// Creates an empty record on first touch.
    pub fn agent_mut(&mut self, agent_role: &str) -> &mut AgentRecord {
        self.agents.entry(agent_role.to_string()).or_default()
    }

    pub fn phase_state(&self, agent_role: &str) -> Option<&AgentPhaseState> {
        self.agents.get(agent_role)?.phase_state.as_ref()
    }

    pub fn phase_state_mut(&mut self, agent_role: &str) -> Option<&mut AgentPhaseState> {
        self.agents.get_mut(agent_role)?.phase_state.as_mut()
    }

    pub fn agents_in_phase(&self, phase: WorkflowPhase) -> Vec<String> {
        self.agents
            .iter()
            .filter(|(_, record)| {
                record
                    .phase_state
                    .as_ref()
                    .is_some_and(|state| state.current_phase == phase)
            })
            .map(|(role, _)| role.clone())
            .collect()
    }
}

/// Partial status written by the status board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Free-form fields merged into the record's `extra` map.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl AgentStatusUpdate {
    pub fn new(status: AgentStatus, stage: impl Into<String>, progress: u8) -> Self {
        Self {
            status: Some(status),
            stage: Some(stage.into()),
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Merges into `record`; absent fields are left untouched.
    pub fn apply_to(&self, record: &mut AgentRecord, now: EpochMillis) {
        if let Some(status) = self.status {
            record.status = Some(status);
        }
        if let Some(stage) = &self.stage {
            record.stage = Some(stage.clone());
        }
        if let Some(progress) = self.progress {
            record.progress = Some(progress.min(100));
        }
        if let Some(message) = &self.message {
            record.message = Some(message.clone());
        }
        for (key, value) in &self.fields {
            record.extra.insert(key.clone(), value.clone());
        }
        record.updated_at = Some(now);
    }
}

/// Why an agent is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupReason {
    Completed,
    Failed,
    Timeout,
    Aborted,
}

impl CleanupReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupReason::Completed => "completed",
            CleanupReason::Failed => "failed",
            CleanupReason::Timeout => "timeout",
            CleanupReason::Aborted => "aborted",
        }
    }

    /// Final `(status, stage, progress)` written to the status board.
    pub fn final_status(&self) -> (AgentStatus, &'static str, u8) {
        match self {
            CleanupReason::Completed => (AgentStatus::Completed, "completed", 100),
            CleanupReason::Failed => (AgentStatus::Failed, "failed", 0),
            CleanupReason::Timeout => (AgentStatus::Timeout, "timeout", 0),
            CleanupReason::Aborted => (AgentStatus::Aborted, "aborted", 0),
        }
    }

    pub fn slot_release_reason(&self) -> SlotReleaseReason {
        match self {
            CleanupReason::Completed => SlotReleaseReason::Completed,
            CleanupReason::Failed => SlotReleaseReason::Failed,
            CleanupReason::Timeout => SlotReleaseReason::Timeout,
            CleanupReason::Aborted => SlotReleaseReason::Aborted,
        }
    }
}

impl fmt::Display for CleanupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanupReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completed" => Ok(CleanupReason::Completed),
            "failed" => Ok(CleanupReason::Failed),
            "timeout" => Ok(CleanupReason::Timeout),
            "aborted" => Ok(CleanupReason::Aborted),
            other => Err(format!(
                "Unknown cleanup reason '{}'. Expected completed, failed, timeout or aborted",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = json!({
            "project": "launch-video",
            "agents": {
                "Video Producer": {
                    "status": "RUNNING",
                    "progress": 40,
                    "avatar": "🎬",
                    "restartCount": 2
                }
            }
        });
        let doc: AgentStatusDocument = serde_json::from_value(raw).unwrap();
        let record = doc.agent("Video Producer").unwrap();
        assert_eq!(record.status, Some(AgentStatus::Running));
        assert_eq!(record.restart_count, 2);
        assert_eq!(record.extra["avatar"], "🎬");

        let back = serde_json::to_value(&doc).unwrap();
        assert_eq!(back["project"], "launch-video");
        assert_eq!(back["agents"]["Video Producer"]["avatar"], "🎬");
        assert_eq!(back["agents"]["Video Producer"]["status"], "RUNNING");
    }

    #[test]
    fn test_update_merges_partial_fields() {
        let mut record = AgentRecord {
            status: Some(AgentStatus::Running),
            stage: Some("plan_design".to_string()),
            progress: Some(30),
            ..Default::default()
        };
        AgentStatusUpdate {
            progress: Some(120),
            ..Default::default()
        }
        .with_field("qaFeedback", json!("fix the intro"))
        .apply_to(&mut record, 99);

        assert_eq!(record.status, Some(AgentStatus::Running));
        assert_eq!(record.stage.as_deref(), Some("plan_design"));
        assert_eq!(record.progress, Some(100));
        assert_eq!(record.extra["qaFeedback"], "fix the intro");
        assert_eq!(record.updated_at, Some(99));
    }

    #[test]
    fn test_cleanup_reason_mapping() {
        assert_eq!(
            CleanupReason::Completed.final_status(),
            (AgentStatus::Completed, "completed", 100)
        );
        for reason in [CleanupReason::Failed, CleanupReason::Timeout, CleanupReason::Aborted] {
            let (status, stage, progress) = reason.final_status();
            assert_eq!(progress, 0);
            assert_eq!(stage, reason.as_str());
            assert_eq!(status.as_str().to_ascii_lowercase(), reason.as_str());
        }
        assert_eq!("TIMEOUT".parse::<CleanupReason>(), Ok(CleanupReason::Timeout));
    }

    #[test]
    fn test_monitored_statuses() {
        assert!(AgentStatus::Running.is_monitored());
        assert!(AgentStatus::PendingVerification.is_monitored());
        assert!(!AgentStatus::Verified.is_monitored());
        assert!(!AgentStatus::Completed.is_monitored());
    }
}
