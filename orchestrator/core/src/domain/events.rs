// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordination events published on the in-process event bus.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::agent_status::CleanupReason;
use crate::domain::approval::PowerDomain;
use crate::domain::clock::EpochMillis;
use crate::domain::concurrency::SlotReleaseReason;
use crate::domain::phase::WorkflowPhase;
use crate::domain::qa::QaResult;
use crate::domain::timeout::TimeoutReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    PhaseTransitioned {
        project: PathBuf,
        agent_role: String,
        from: WorkflowPhase,
        to: WorkflowPhase,
        triggered_by: Option<String>,
        at: EpochMillis,
    },
    ApprovalGranted {
        project: PathBuf,
        agent_role: String,
        domain: PowerDomain,
        approver_id: String,
        fully_approved: bool,
        at: EpochMillis,
    },
    ApprovalRevoked {
        project: PathBuf,
        agent_role: String,
        at: EpochMillis,
    },
    SlotAcquired {
        project: PathBuf,
        slot_id: String,
        agent_role: String,
        agent_id: String,
        at: EpochMillis,
    },
    SlotQueued {
        project: PathBuf,
        agent_role: String,
        agent_id: String,
        position: usize,
        at: EpochMillis,
    },
    SlotReleased {
        project: PathBuf,
        slot_id: String,
        agent_role: String,
        reason: SlotReleaseReason,
        at: EpochMillis,
    },
    QaSubmitted {
        project: PathBuf,
        agent_role: String,
        position: usize,
        at: EpochMillis,
    },
    QaStarted {
        project: PathBuf,
        agent_role: String,
        at: EpochMillis,
    },
    QaCompleted {
        project: PathBuf,
        agent_role: String,
        result: QaResult,
        at: EpochMillis,
    },
    Timeout {
        project: PathBuf,
        report: TimeoutReport,
        at: EpochMillis,
    },
    AgentCleanedUp {
        project: PathBuf,
        agent_role: String,
        reason: CleanupReason,
        failed_steps: usize,
        at: EpochMillis,
    },
}

impl CoordinationEvent {
    pub fn agent_role(&self) -> &str {
        match self {
            CoordinationEvent::PhaseTransitioned { agent_role, .. }
            | CoordinationEvent::ApprovalGranted { agent_role, .. }
            | CoordinationEvent::ApprovalRevoked { agent_role, .. }
            | CoordinationEvent::SlotAcquired { agent_role, .. }
            | CoordinationEvent::SlotQueued { agent_role, .. }
            | CoordinationEvent::SlotReleased { agent_role, .. }
            | CoordinationEvent::QaSubmitted { agent_role, .. }
            | CoordinationEvent::QaStarted { agent_role, .. }
            | CoordinationEvent::QaCompleted { agent_role, .. }
            | CoordinationEvent::AgentCleanedUp { agent_role, .. } => agent_role,
            CoordinationEvent::Timeout { report, .. } => &report.agent_role,
        }
    }
}
