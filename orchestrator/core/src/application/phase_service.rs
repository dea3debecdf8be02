// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Phase State Service
//!
//! Lock-protected read-modify-write of each agent's
//! [`AgentPhaseState`] inside `agent-status.json`. Transition and approval
//! rules come from [`crate::domain::phase`]; this service only adds the
//! critical section, persistence and event publication.
//!
//! Invalid transitions and approvals come back as `ValidationResult`s and
//! leave the document untouched. Operating on an agent that was never
//! initialized is a [`CoordinationError::PhaseStateNotFound`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Persists and guards per-agent workflow phase state

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::agent_status::AgentStatusDocument;
use crate::domain::approval::{ApprovalState, PowerDomain};
use crate::domain::clock::Clock;
use crate::domain::config::ApprovalConfig;
use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::events::CoordinationEvent;
use crate::domain::phase::{AgentPhaseState, PhaseTransition, ValidationResult, WorkflowPhase};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::json_store::DocumentStore;
use crate::infrastructure::project::ProjectLayout;

pub struct PhaseStateService {
    store: DocumentStore,
    clock: Arc<dyn Clock>,
    approval_defaults: ApprovalConfig,
    event_bus: EventBus,
}

impl PhaseStateService {
    pub fn new(
        store: DocumentStore,
        clock: Arc<dyn Clock>,
        approval_defaults: ApprovalConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            clock,
            approval_defaults,
            event_bus,
        }
    }

    /// Creates (or overwrites) the agent's phase state. Callers guard
    /// against double initialization.
    pub async fn initialize_phase_state(
        &self,
        project: &Path,
        agent_role: &str,
        initial_phase: WorkflowPhase,
    ) -> CoordinationResult<AgentPhaseState> {
        let layout = ProjectLayout::new(project);
        let approval = ApprovalState::new(
            self.approval_defaults.primary_domain,
            self.approval_defaults.required_signoffs.clone(),
        );
        let state = AgentPhaseState::new(agent_role, initial_phase, approval, self.clock.now_millis());

        let stored = state.clone();
        let replaced = self
            .store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    Ok(doc.agent_mut(agent_role).phase_state.replace(stored).is_some())
                },
            )
            .await?;

        if replaced {
            warn!(agent_role, "Overwrote existing phase state on initialization");
        }
        info!(agent_role, phase = %initial_phase, "Initialized phase state");
        Ok(state)
    }

    /// Lock-free read; may be slightly stale.
    pub async fn get_phase_state(
        &self,
        project: &Path,
        agent_role: &str,
    ) -> CoordinationResult<Option<AgentPhaseState>> {
        let doc: AgentStatusDocument = self
            .store
            .read(&ProjectLayout::new(project).agent_status())
            .await?;
        Ok(doc.phase_state(agent_role).cloned())
    }

    pub async fn require_phase_state(
        &self,
        project: &Path,
        agent_role: &str,
    ) -> CoordinationResult<AgentPhaseState> {
        self.get_phase_state(project, agent_role)
            .await?
            .ok_or_else(|| CoordinationError::PhaseStateNotFound(agent_role.to_string()))
    }

    /// Validates and applies a transition atomically.
    pub async fn transition_phase(
        &self,
        project: &Path,
        agent_role: &str,
        to: WorkflowPhase,
        triggered_by: Option<&str>,
    ) -> CoordinationResult<ValidationResult> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();

        let (from, result) = self
            .store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    let state = doc
                        .phase_state_mut(agent_role)
                        .ok_or_else(|| CoordinationError::PhaseStateNotFound(agent_role.to_string()))?;
                    let from = state.current_phase;
                    let result = state.transition_to(to, triggered_by.map(str::to_string), now);
                    Ok((from, result))
                },
            )
            .await?;

        if result.valid {
            info!(agent_role, %from, %to, "Phase transition");
            metrics::counter!("council_phase_transitions_total", "to" => to.as_str()).increment(1);
            self.event_bus.publish(CoordinationEvent::PhaseTransitioned {
                project: project.to_path_buf(),
                agent_role: agent_role.to_string(),
                from,
                to,
                triggered_by: triggered_by.map(str::to_string),
                at: now,
            });
        } else {
            info!(
                agent_role,
                %from,
                %to,
                reason = result.reason.as_deref().unwrap_or_default(),
                "Phase transition rejected"
            );
        }
        Ok(result)
    }

    /// Records `domain`'s signoff. Does not move the agent to execution.
    pub async fn grant_approval(
        &self,
        project: &Path,
        agent_role: &str,
        approver_id: &str,
        domain: PowerDomain,
    ) -> CoordinationResult<ValidationResult> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();

        let (result, fully_approved) = self
            .store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    let state = doc
                        .phase_state_mut(agent_role)
                        .ok_or_else(|| CoordinationError::PhaseStateNotFound(agent_role.to_string()))?;
                    let result = state.grant_approval(approver_id, domain, now);
                    Ok((result, state.approval.is_fully_approved()))
                },
            )
            .await?;

        if result.valid {
            info!(agent_role, %domain, approver_id, fully_approved, "Approval granted");
            self.event_bus.publish(CoordinationEvent::ApprovalGranted {
                project: project.to_path_buf(),
                agent_role: agent_role.to_string(),
                domain,
                approver_id: approver_id.to_string(),
                fully_approved,
                at: now,
            });
        }
        Ok(result)
    }

    /// Resets every domain's approval to un-granted.
    pub async fn revoke_approval(&self, project: &Path, agent_role: &str) -> CoordinationResult<()> {
        let layout = ProjectLayout::new(project);
        self.store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    doc.phase_state_mut(agent_role)
                        .ok_or_else(|| CoordinationError::PhaseStateNotFound(agent_role.to_string()))?
                        .revoke_approval();
                    Ok(())
                },
            )
            .await?;

        warn!(agent_role, "Approval revoked");
        self.event_bus.publish(CoordinationEvent::ApprovalRevoked {
            project: project.to_path_buf(),
            agent_role: agent_role.to_string(),
            at: self.clock.now_millis(),
        });
        Ok(())
    }

    /// Sends the agent back to `plan_design` and clears its approvals in one
    /// critical section. Only `awaiting_approval` has that edge; from any
    /// other phase the rejection is refused and nothing is written.
    pub async fn reject_plan(
        &self,
        project: &Path,
        agent_role: &str,
        triggered_by: Option<&str>,
    ) -> CoordinationResult<ValidationResult> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();

        let (from, result) = self
            .store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    let state = doc
                        .phase_state_mut(agent_role)
                        .ok_or_else(|| CoordinationError::PhaseStateNotFound(agent_role.to_string()))?;
                    let from = state.current_phase;
                    let result = state.transition_to(
                        WorkflowPhase::PlanDesign,
                        triggered_by.map(str::to_string),
                        now,
                    );
                    if result.valid {
                        state.revoke_approval();
                    }
                    Ok((from, result))
                },
            )
            .await?;

        if !result.valid {
            info!(
                agent_role,
                %from,
                reason = result.reason.as_deref().unwrap_or_default(),
                "Plan rejection refused"
            );
            return Ok(result);
        }

        warn!(agent_role, %from, "Plan rejected; approvals revoked");
        metrics::counter!("council_phase_transitions_total", "to" => WorkflowPhase::PlanDesign.as_str())
            .increment(1);
        self.event_bus.publish(CoordinationEvent::ApprovalRevoked {
            project: project.to_path_buf(),
            agent_role: agent_role.to_string(),
            at: now,
        });
        self.event_bus.publish(CoordinationEvent::PhaseTransitioned {
            project: project.to_path_buf(),
            agent_role: agent_role.to_string(),
            from,
            to: WorkflowPhase::PlanDesign,
            triggered_by: triggered_by.map(str::to_string),
            at: now,
        });
        Ok(result)
    }

    /// Restarts the agent's workflow at `to_phase` with fresh approvals and
    /// an empty history.
    pub async fn reset_phase_state(
        &self,
        project: &Path,
        agent_role: &str,
        to_phase: WorkflowPhase,
    ) -> CoordinationResult<()> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();
        let approval = ApprovalState::new(
            self.approval_defaults.primary_domain,
            self.approval_defaults.required_signoffs.clone(),
        );

        self.store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    let state = doc
                        .phase_state_mut(agent_role)
                        .ok_or_else(|| CoordinationError::PhaseStateNotFound(agent_role.to_string()))?;
                    *state = AgentPhaseState::new(agent_role, to_phase, approval, now);
                    Ok(())
                },
            )
            .await?;

        info!(agent_role, phase = %to_phase, "Reset phase state");
        Ok(())
    }

    pub async fn can_proceed_to_execution(
        &self,
        project: &Path,
        agent_role: &str,
    ) -> CoordinationResult<bool> {
        Ok(self
            .get_phase_state(project, agent_role)
            .await?
            .is_some_and(|state| state.can_proceed_to_execution()))
    }

    pub async fn get_approval_state(
        &self,
        project: &Path,
        agent_role: &str,
    ) -> CoordinationResult<Option<ApprovalState>> {
        Ok(self
            .get_phase_state(project, agent_role)
            .await?
            .map(|state| state.approval))
    }

    pub async fn get_transition_history(
        &self,
        project: &Path,
        agent_role: &str,
    ) -> CoordinationResult<Vec<PhaseTransition>> {
        Ok(self
            .get_phase_state(project, agent_role)
            .await?
            .map(|state| state.transition_history)
            .unwrap_or_default())
    }

    pub async fn get_agents_in_phase(
        &self,
        project: &Path,
        phase: WorkflowPhase,
    ) -> CoordinationResult<Vec<String>> {
        let doc: AgentStatusDocument = self
            .store
            .read(&ProjectLayout::new(project).agent_status())
            .await?;
        Ok(doc.agents_in_phase(phase))
    }

    pub async fn get_agents_awaiting_approval(&self, project: &Path) -> CoordinationResult<Vec<String>> {
        self.get_agents_in_phase(project, WorkflowPhase::AwaitingApproval)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use tempfile::TempDir;

    fn service(clock: Arc<ManualClock>) -> PhaseStateService {
        PhaseStateService::new(
            DocumentStore::default(),
            clock,
            ApprovalConfig::default(),
            EventBus::new(64),
        )
    }

    async fn walk_to_approval(svc: &PhaseStateService, project: &Path, role: &str) {
        svc.initialize_phase_state(project, role, WorkflowPhase::SkillDiscovery)
            .await
            .unwrap();
        for phase in [
            WorkflowPhase::RequirementUnderstanding,
            WorkflowPhase::SkillResearch,
            WorkflowPhase::PlanDesign,
            WorkflowPhase::AwaitingApproval,
        ] {
            assert!(svc.transition_phase(project, role, phase, None).await.unwrap().valid);
        }
    }

    #[tokio::test]
    async fn test_missing_state_is_hard_error() {
        let dir = TempDir::new().unwrap();
        let svc = service(ManualClock::new(0));
        let err = svc
            .transition_phase(dir.path(), "ghost", WorkflowPhase::RequirementUnderstanding, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::PhaseStateNotFound(role) if role == "ghost"));
        assert!(svc.grant_approval(dir.path(), "ghost", "pm", PowerDomain::Planning).await.is_err());
        assert!(svc.revoke_approval(dir.path(), "ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_execution_requires_every_required_domain() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(1_000);
        let svc = service(clock.clone());
        walk_to_approval(&svc, dir.path(), "Writer").await;

        let approval = svc.get_approval_state(dir.path(), "Writer").await.unwrap().unwrap();
        assert!(approval.required);

        svc.grant_approval(dir.path(), "Writer", "pm", PowerDomain::Planning)
            .await
            .unwrap();
        let blocked = svc
            .transition_phase(dir.path(), "Writer", WorkflowPhase::Execution, Some("pm"))
            .await
            .unwrap();
        assert!(!blocked.valid);
        assert!(!svc.can_proceed_to_execution(dir.path(), "Writer").await.unwrap());

        svc.grant_approval(dir.path(), "Writer", "tech-lead", PowerDomain::Execution)
            .await
            .unwrap();
        assert!(svc.can_proceed_to_execution(dir.path(), "Writer").await.unwrap());

        clock.advance_secs(5);
        let ok = svc
            .transition_phase(dir.path(), "Writer", WorkflowPhase::Execution, Some("pm"))
            .await
            .unwrap();
        assert!(ok.valid);

        let state = svc.require_phase_state(dir.path(), "Writer").await.unwrap();
        assert_eq!(state.current_phase, WorkflowPhase::Execution);
        assert_eq!(state.phase_start_time, 6_000);
        assert_eq!(state.transition_history.len(), 5);
        assert_eq!(state.transition_history[4].triggered_by.as_deref(), Some("pm"));
    }

    #[tokio::test]
    async fn test_rejected_transition_leaves_document_untouched() {
        let dir = TempDir::new().unwrap();
        let svc = service(ManualClock::new(0));
        svc.initialize_phase_state(dir.path(), "Editor", WorkflowPhase::PlanDesign)
            .await
            .unwrap();
        let path = ProjectLayout::new(dir.path()).agent_status();
        let before = std::fs::read_to_string(&path).unwrap();

        let result = svc
            .transition_phase(dir.path(), "Editor", WorkflowPhase::Completion, None)
            .await
            .unwrap();
        assert!(!result.valid);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_grant_outside_awaiting_approval_is_invalid() {
        let dir = TempDir::new().unwrap();
        let svc = service(ManualClock::new(0));
        svc.initialize_phase_state(dir.path(), "Editor", WorkflowPhase::PlanDesign)
            .await
            .unwrap();
        let result = svc
            .grant_approval(dir.path(), "Editor", "pm", PowerDomain::Planning)
            .await
            .unwrap();
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("plan_design"));
    }

    #[tokio::test]
    async fn test_revoke_then_reject_loop() {
        let dir = TempDir::new().unwrap();
        let svc = service(ManualClock::new(0));
        walk_to_approval(&svc, dir.path(), "Writer").await;
        svc.grant_approval(dir.path(), "Writer", "pm", PowerDomain::Planning)
            .await
            .unwrap();

        svc.revoke_approval(dir.path(), "Writer").await.unwrap();
        let approval = svc.get_approval_state(dir.path(), "Writer").await.unwrap().unwrap();
        assert!(!approval.is_fully_approved());
        assert!(approval.approvals.values().all(|a| !a.granted));

        assert!(svc
            .transition_phase(dir.path(), "Writer", WorkflowPhase::PlanDesign, Some("reject"))
            .await
            .unwrap()
            .valid);
        assert_eq!(
            svc.get_agents_in_phase(dir.path(), WorkflowPhase::PlanDesign).await.unwrap(),
            vec!["Writer".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reject_plan_outside_awaiting_approval_keeps_approvals() {
        let dir = TempDir::new().unwrap();
        let svc = service(ManualClock::new(0));
        walk_to_approval(&svc, dir.path(), "Writer").await;
        svc.grant_approval(dir.path(), "Writer", "pm", PowerDomain::Planning)
            .await
            .unwrap();
        svc.grant_approval(dir.path(), "Writer", "tech-lead", PowerDomain::Execution)
            .await
            .unwrap();
        assert!(svc
            .transition_phase(dir.path(), "Writer", WorkflowPhase::Execution, Some("pm"))
            .await
            .unwrap()
            .valid);
        let path = ProjectLayout::new(dir.path()).agent_status();
        let before = std::fs::read_to_string(&path).unwrap();

        let result = svc.reject_plan(dir.path(), "Writer", Some("qa")).await.unwrap();
        assert!(!result.valid);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);

        let state = svc.require_phase_state(dir.path(), "Writer").await.unwrap();
        assert_eq!(state.current_phase, WorkflowPhase::Execution);
        assert!(state.approval.is_fully_approved());
    }

    #[tokio::test]
    async fn test_reject_plan_from_awaiting_approval_revokes() {
        let dir = TempDir::new().unwrap();
        let svc = service(ManualClock::new(0));
        walk_to_approval(&svc, dir.path(), "Writer").await;
        svc.grant_approval(dir.path(), "Writer", "pm", PowerDomain::Planning)
            .await
            .unwrap();

        assert!(svc.reject_plan(dir.path(), "Writer", Some("qa")).await.unwrap().valid);

        let state = svc.require_phase_state(dir.path(), "Writer").await.unwrap();
        assert_eq!(state.current_phase, WorkflowPhase::PlanDesign);
        assert!(state.approval.approvals.values().all(|a| !a.granted));
        assert!(!state.approval.is_fully_approved());
    }

    #[tokio::test]
    async fn test_reset_and_queries() {
        let dir = TempDir::new().unwrap();
        let svc = service(ManualClock::new(0));
        walk_to_approval(&svc, dir.path(), "Writer").await;
        walk_to_approval(&svc, dir.path(), "Editor").await;

        let mut waiting = svc.get_agents_awaiting_approval(dir.path()).await.unwrap();
        waiting.sort();
        assert_eq!(waiting, vec!["Editor".to_string(), "Writer".to_string()]);

        svc.reset_phase_state(dir.path(), "Writer", WorkflowPhase::SkillDiscovery)
            .await
            .unwrap();
        assert!(svc.get_transition_history(dir.path(), "Writer").await.unwrap().is_empty());
        assert_eq!(
            svc.get_agents_awaiting_approval(dir.path()).await.unwrap(),
            vec!["Editor".to_string()]
        );
        assert!(svc.get_transition_history(dir.path(), "nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transitions_are_published() {
        let dir = TempDir::new().unwrap();
        let svc = service(ManualClock::new(0));
        let mut rx = svc.event_bus.subscribe();
        svc.initialize_phase_state(dir.path(), "Writer", WorkflowPhase::PlanDesign)
            .await
            .unwrap();
        svc.transition_phase(dir.path(), "Writer", WorkflowPhase::AwaitingApproval, None)
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            CoordinationEvent::PhaseTransitioned { from, to, .. } => {
                assert_eq!(from, WorkflowPhase::PlanDesign);
                assert_eq!(to, WorkflowPhase::AwaitingApproval);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
