// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Workflow Phase State Machine
//!
//! Per-agent workflow state and the rules that govern it:
//!
//! ```text
//! skill_discovery → requirement → skill_research → plan_design → awaiting_approval
//!                                                       ↑               │
//!                                                       └── (reject) ───┤
//!                                                                       ↓ (fully approved)
//!                                                                   execution → completion
//! ```
//!
//! Everything here is pure. Locking and persistence live in
//! [`PhaseStateService`](crate::application::phase_service::PhaseStateService).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Transition legality and approval gating for agent workflows

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalState, PowerDomain};
use crate::domain::clock::EpochMillis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    SkillDiscovery,
    #[serde(rename = "requirement", alias = "requirement_understanding")]
    RequirementUnderstanding,
    SkillResearch,
    PlanDesign,
    AwaitingApproval,
    Execution,
    Completion,
}

impl WorkflowPhase {
    pub const ALL: [WorkflowPhase; 7] = [
        WorkflowPhase::SkillDiscovery,
        WorkflowPhase::RequirementUnderstanding,
        WorkflowPhase::SkillResearch,
        WorkflowPhase::PlanDesign,
        WorkflowPhase::AwaitingApproval,
        WorkflowPhase::Execution,
        WorkflowPhase::Completion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::SkillDiscovery => "skill_discovery",
            WorkflowPhase::RequirementUnderstanding => "requirement",
            WorkflowPhase::SkillResearch => "skill_research",
            WorkflowPhase::PlanDesign => "plan_design",
            WorkflowPhase::AwaitingApproval => "awaiting_approval",
            WorkflowPhase::Execution => "execution",
            WorkflowPhase::Completion => "completion",
        }
    }

    /// Phases reachable in one step from `self`.
    pub fn allowed_successors(&self) -> &'static [WorkflowPhase] {
        match self {
            WorkflowPhase::SkillDiscovery => &[WorkflowPhase::RequirementUnderstanding],
            WorkflowPhase::RequirementUnderstanding => &[WorkflowPhase::SkillResearch],
            WorkflowPhase::SkillResearch => &[WorkflowPhase::PlanDesign],
            WorkflowPhase::PlanDesign => &[WorkflowPhase::AwaitingApproval],
            WorkflowPhase::AwaitingApproval => {
                &[WorkflowPhase::Execution, WorkflowPhase::PlanDesign]
            }
            WorkflowPhase::Execution => &[WorkflowPhase::Completion],
            WorkflowPhase::Completion => &[],
        }
    }

    pub fn can_transition_to(&self, to: WorkflowPhase) -> bool {
        self.allowed_successors().contains(&to)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_successors().is_empty()
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "skill_discovery" => Ok(WorkflowPhase::SkillDiscovery),
            "requirement" | "requirement_understanding" | "understanding" => {
                Ok(WorkflowPhase::RequirementUnderstanding)
            }
            "skill_research" | "research" => Ok(WorkflowPhase::SkillResearch),
            "plan_design" | "planning" => Ok(WorkflowPhase::PlanDesign),
            "awaiting_approval" | "waiting_approval" => Ok(WorkflowPhase::AwaitingApproval),
            "execution" => Ok(WorkflowPhase::Execution),
            "completion" | "completed" => Ok(WorkflowPhase::Completion),
            _ => Err(format!("Unknown workflow phase '{}'", s)),
        }
    }
}

/// Only `awaiting_approval` gates on approval.
pub fn requires_approval(phase: WorkflowPhase) -> bool {
    phase == WorkflowPhase::AwaitingApproval
}

/// Maps a human-facing stage label onto a phase.
///
/// Accepts phase names and their short forms as well as the localized labels
/// agents write into their status board entries.
pub fn map_stage_to_phase(stage: &str) -> Option<WorkflowPhase> {
    match stage.trim() {
        "技能发现" => Some(WorkflowPhase::SkillDiscovery),
        "需求理解" => Some(WorkflowPhase::RequirementUnderstanding),
        "Skill调研" => Some(WorkflowPhase::SkillResearch),
        "方案规划" => Some(WorkflowPhase::PlanDesign),
        "等待批准" | "等待PM批准" | "等待审批" => Some(WorkflowPhase::AwaitingApproval),
        "执行" => Some(WorkflowPhase::Execution),
        "完成" => Some(WorkflowPhase::Completion),
        other => other.parse().ok(),
    }
}

/// Outcome of a transition or approval attempt.
///
/// Invalid results are expected workflow outcomes, so they are values rather
/// than errors and carry a reason a human reviewer can read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Checks the successor table, then the execution gate.
pub fn validate_phase_transition(
    from: WorkflowPhase,
    to: WorkflowPhase,
    approval: &ApprovalState,
) -> ValidationResult {
    if !from.can_transition_to(to) {
        let allowed = from
            .allowed_successors()
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>();
        let allowed = if allowed.is_empty() {
            "none (terminal phase)".to_string()
        } else {
            allowed.join(", ")
        };
        return ValidationResult::invalid(format!(
            "Invalid transition: {} → {}. Allowed transitions from {}: {}",
            from, to, from, allowed
        ));
    }

    // Holds regardless of which edges exist in the table.
    if to == WorkflowPhase::Execution && !approval.is_fully_approved() {
        let pending = approval
            .pending_domains()
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return ValidationResult::invalid(format!(
            "Cannot proceed to execution without full approval. Pending domains: {}",
            pending
        ));
    }

    ValidationResult::ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransition {
    pub from: WorkflowPhase,
    pub to: WorkflowPhase,
    pub timestamp: EpochMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

/// Workflow state of one agent role within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPhaseState {
    pub agent_role: String,
    pub current_phase: WorkflowPhase,
    pub previous_phase: Option<WorkflowPhase>,
    pub phase_start_time: EpochMillis,
    pub approval: ApprovalState,
    #[serde(default)]
    pub transition_history: Vec<PhaseTransition>,
}

impl AgentPhaseState {
    pub fn new(
        agent_role: impl Into<String>,
        initial_phase: WorkflowPhase,
        approval: ApprovalState,
        now: EpochMillis,
    ) -> Self {
        let mut approval = approval;
        approval.required = requires_approval(initial_phase);
        Self {
            agent_role: agent_role.into(),
            current_phase: initial_phase,
            previous_phase: None,
            phase_start_time: now,
            approval,
            transition_history: Vec::new(),
        }
    }

    /// Validates and, only if valid, applies the transition.
    pub fn transition_to(
        &mut self,
        to: WorkflowPhase,
        triggered_by: Option<String>,
        now: EpochMillis,
    ) -> ValidationResult {
        let validation = validate_phase_transition(self.current_phase, to, &self.approval);
        if !validation.valid {
            return validation;
        }

        let from = self.current_phase;
        self.transition_history.push(PhaseTransition {
            from,
            to,
            timestamp: now,
            triggered_by,
        });
        self.previous_phase = Some(from);
        self.current_phase = to;
        self.phase_start_time = now;

        if requires_approval(to) {
            self.approval.required = true;
        }

        validation
    }

    /// Records a domain signoff. Only legal while awaiting approval.
    pub fn grant_approval(
        &mut self,
        approver_id: &str,
        domain: PowerDomain,
        now: EpochMillis,
    ) -> ValidationResult {
        if self.current_phase != WorkflowPhase::AwaitingApproval {
            return ValidationResult::invalid(format!(
                "Cannot approve: {} is in {} phase, not awaiting_approval",
                self.agent_role, self.current_phase
            ));
        }

        self.approval.grant(domain, approver_id, now);
        ValidationResult::ok()
    }

    pub fn revoke_approval(&mut self) {
        self.approval.revoke_all();
    }

    pub fn can_proceed_to_execution(&self) -> bool {
        self.current_phase == WorkflowPhase::AwaitingApproval && self.approval.is_fully_approved()
    }
}
