// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Council Service
//!
//! The workflow surface the agents and their leadership drive: plan
//! approval and rejection, the move into execution, QA hand-off, execution
//! slots and monitoring registration. Each operation goes through the
//! phase, QA, concurrency and monitor services for its state change and then
//! mirrors the outcome onto the status board and the decision log.
//!
//! State changes are authoritative; the mirroring is not. A failed status
//! update or decision record is logged and the operation still succeeds.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::application::concurrency_service::{ConcurrencyManager, SlotRequest};
use crate::application::phase_service::PhaseStateService;
use crate::application::qa_queue::{NewSubmission, QaQueueService};
use crate::application::timeout_monitor::TimeoutMonitor;
use crate::domain::agent_status::{AgentStatus, AgentStatusUpdate};
use crate::domain::approval::{ApprovalState, PowerDomain};
use crate::domain::concurrency::{ExecutionSlot, SlotReleaseReason};
use crate::domain::council::{
    DecisionOutcome, DomainVote, NewCouncilDecision, Participant, AGENT_PLAN_APPROVAL,
    AGENT_PLAN_REJECTION,
};
use crate::domain::error::CoordinationResult;
use crate::domain::phase::{ValidationResult, WorkflowPhase};
use crate::domain::qa::{QaHistoryEntry, QaResult, QaSubmission};
use crate::infrastructure::decision_log::DecisionRecorder;
use crate::infrastructure::status_board::StatusBoard;

/// Result of an approve or reject action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouncilOutcome {
    /// `false` when the action was refused; `message` says why.
    pub accepted: bool,
    pub fully_approved: bool,
    pub message: String,
}

impl CouncilOutcome {
    fn refused(validation: ValidationResult) -> Self {
        Self {
            accepted: false,
            fully_approved: false,
            message: validation.reason.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentApprovalStatus {
    pub agent_role: String,
    pub current_phase: WorkflowPhase,
    pub fully_approved: bool,
    pub pending_domains: Vec<PowerDomain>,
    pub approval: ApprovalState,
}

pub struct CouncilService {
    phases: Arc<PhaseStateService>,
    qa: Arc<QaQueueService>,
    concurrency: Arc<ConcurrencyManager>,
    monitor: Arc<TimeoutMonitor>,
    status_board: Arc<dyn StatusBoard>,
    decisions: Arc<dyn DecisionRecorder>,
}

impl CouncilService {
    pub fn new(
        phases: Arc<PhaseStateService>,
        qa: Arc<QaQueueService>,
        concurrency: Arc<ConcurrencyManager>,
        monitor: Arc<TimeoutMonitor>,
        status_board: Arc<dyn StatusBoard>,
        decisions: Arc<dyn DecisionRecorder>,
    ) -> Self {
        Self {
            phases,
            qa,
            concurrency,
            monitor,
            status_board,
            decisions,
        }
    }

    async fn publish_status(&self, project: &Path, agent_role: &str, update: AgentStatusUpdate) {
        if let Err(e) = self
            .status_board
            .update_agent_status(project, agent_role, update)
            .await
        {
            warn!(agent_role, error = %e, "Failed to update status board");
        }
    }

    async fn log_decision(&self, project: &Path, message: &str, who: &str) {
        if let Err(e) = self.status_board.log_decision(project, message, who).await {
            warn!(error = %e, "Failed to log decision");
        }
    }

    async fn record_decision(&self, project: &Path, decision: NewCouncilDecision) {
        if let Err(e) = self.decisions.record_decision(project, decision).await {
            warn!(error = %e, "Failed to record council decision");
        }
    }

    /// Records `domain`'s approval of the agent's plan.
    ///
    /// Does not move the agent into execution; see
    /// [`start_execution`](Self::start_execution).
    pub async fn approve_agent_plan(
        &self,
        project: &Path,
        agent_role: &str,
        approver_id: &str,
        domain: PowerDomain,
    ) -> CoordinationResult<CouncilOutcome> {
        let validation = self
            .phases
            .grant_approval(project, agent_role, approver_id, domain)
            .await?;
        if !validation.valid {
            warn!(agent_role, %domain, "Approval refused");
            return Ok(CouncilOutcome::refused(validation));
        }

        let fully_approved = self
            .phases
            .get_approval_state(project, agent_role)
            .await?
            .is_some_and(|approval| approval.is_fully_approved());

        let (update, message) = if fully_approved {
            (
                AgentStatusUpdate::new(AgentStatus::Running, WorkflowPhase::Execution.as_str(), 40)
                    .with_message("All required domains approved, starting execution"),
                format!("{} is fully approved and may start execution", agent_role),
            )
        } else {
            (
                AgentStatusUpdate::new(
                    AgentStatus::PendingVerification,
                    WorkflowPhase::AwaitingApproval.as_str(),
                    35,
                )
                .with_message(format!("{} approved, waiting for other domains", domain)),
                format!("{} approved by {}, waiting for other domains", agent_role, domain),
            )
        };
        info!(agent_role, %domain, approver_id, fully_approved, "Plan approved");

        self.publish_status(project, agent_role, update).await;
        self.log_decision(
            project,
            &format!("{} approved the execution plan of {}", domain, agent_role),
            approver_id,
        )
        .await;
        self.record_decision(
            project,
            NewCouncilDecision {
                decision_type: AGENT_PLAN_APPROVAL.to_string(),
                primary_domain: domain,
                decision: format!("Approved {} execution plan", agent_role),
                context: None,
                cross_check_id: None,
                participants: vec![Participant {
                    domain,
                    vote: DomainVote::Approve,
                    reason: None,
                }],
                outcome: DecisionOutcome::Approved,
            },
        )
        .await;

        Ok(CouncilOutcome {
            accepted: true,
            fully_approved,
            message,
        })
    }

    /// Revokes all approvals and sends the agent back to `plan_design`.
    ///
    /// Only an agent in `awaiting_approval` can be rejected. From any other
    /// phase the outcome is refused and the agent's approvals are kept.
    pub async fn reject_agent_plan(
        &self,
        project: &Path,
        agent_role: &str,
        reason: &str,
        rejecter_id: &str,
        domain: PowerDomain,
    ) -> CoordinationResult<CouncilOutcome> {
        let validation = self
            .phases
            .reject_plan(project, agent_role, Some(rejecter_id))
            .await?;
        if !validation.valid {
            warn!(agent_role, %domain, "Rejection refused");
            return Ok(CouncilOutcome::refused(validation));
        }
        info!(agent_role, %domain, rejecter_id, reason, "Plan rejected");

        self.publish_status(
            project,
            agent_role,
            AgentStatusUpdate::new(AgentStatus::Running, WorkflowPhase::PlanDesign.as_str(), 30)
                .with_message(format!("{} requested plan changes: {}", domain, reason)),
        )
        .await;
        self.log_decision(
            project,
            &format!("{} rejected the plan of {}: {}", domain, agent_role, reason),
            rejecter_id,
        )
        .await;
        self.record_decision(
            project,
            NewCouncilDecision {
                decision_type: AGENT_PLAN_REJECTION.to_string(),
                primary_domain: domain,
                decision: format!("Rejected {} plan: {}", agent_role, reason),
                context: None,
                cross_check_id: None,
                participants: vec![Participant {
                    domain,
                    vote: DomainVote::Object,
                    reason: Some(reason.to_string()),
                }],
                outcome: DecisionOutcome::Rejected,
            },
        )
        .await;

        Ok(CouncilOutcome {
            accepted: true,
            fully_approved: false,
            message: format!("{} must revise its plan: {}", agent_role, reason),
        })
    }

    /// Moves a fully approved agent into execution and restarts its stage timer.
    pub async fn start_execution(
        &self,
        project: &Path,
        agent_role: &str,
        triggered_by: Option<&str>,
    ) -> CoordinationResult<ValidationResult> {
        let validation = self
            .phases
            .transition_phase(project, agent_role, WorkflowPhase::Execution, triggered_by)
            .await?;
        if validation.valid {
            if let Err(e) = self
                .monitor
                .update_agent_stage(project, agent_role, WorkflowPhase::Execution)
                .await
            {
                warn!(agent_role, error = %e, "Failed to restart stage timer for execution");
            }
        }
        Ok(validation)
    }

    pub async fn get_agent_approval_status(
        &self,
        project: &Path,
        agent_role: &str,
    ) -> CoordinationResult<Option<AgentApprovalStatus>> {
        Ok(self
            .phases
            .get_phase_state(project, agent_role)
            .await?
            .map(|state| AgentApprovalStatus {
                agent_role: state.agent_role,
                current_phase: state.current_phase,
                fully_approved: state.approval.is_fully_approved(),
                pending_domains: state.approval.pending_domains(),
                approval: state.approval,
            }))
    }

    pub async fn get_agents_awaiting_approval(&self, project: &Path) -> CoordinationResult<Vec<String>> {
        self.phases.get_agents_awaiting_approval(project).await
    }

    /// Hands a deliverable to QA. Refuses a second submission from the same
    /// role while one is pending or being validated.
    pub async fn submit_to_qa(
        &self,
        project: &Path,
        submission: NewSubmission,
    ) -> CoordinationResult<usize> {
        let agent_role = submission.agent_role.clone();
        let position = self.qa.enqueue_unique(project, submission).await?;
        self.publish_status(
            project,
            &agent_role,
            AgentStatusUpdate::new(AgentStatus::PendingVerification, "qa_pending", 95)
                .with_message(format!("Waiting for QA, position {}", position + 1)),
        )
        .await;
        Ok(position)
    }

    pub async fn process_next_qa_submission(&self, project: &Path) -> CoordinationResult<Option<QaSubmission>> {
        let next = self.qa.dequeue_submission(project).await?;
        if let Some(submission) = &next {
            self.publish_status(
                project,
                &submission.agent_role,
                AgentStatusUpdate::new(AgentStatus::UnderVerification, "qa_validation", 96)
                    .with_message(format!("QA validating {}", submission.deliverable)),
            )
            .await;
        }
        Ok(next)
    }

    /// Finishes the in-flight validation. `None` when nothing was in flight.
    pub async fn complete_qa_validation(
        &self,
        project: &Path,
        passed: bool,
        feedback: Option<String>,
    ) -> CoordinationResult<Option<QaHistoryEntry>> {
        let result = if passed { QaResult::Passed } else { QaResult::Failed };
        let entry = self
            .qa
            .complete_validation(project, result, feedback.clone())
            .await?;

        if let Some(entry) = &entry {
            let update = if passed {
                AgentStatusUpdate::new(AgentStatus::Verified, "qa_passed", 100)
                    .with_message("QA validation passed")
            } else {
                let mut update = AgentStatusUpdate::new(AgentStatus::ReturnedForFix, "qa_failed", 85)
                    .with_message("QA validation failed, returned for fixes");
                if let Some(feedback) = feedback {
                    update = update.with_field("qaFeedback", serde_json::Value::String(feedback));
                }
                update
            };
            self.publish_status(project, &entry.submission.agent_role, update).await;
        }
        Ok(entry)
    }

    pub async fn acquire_execution_slot(
        &self,
        project: &Path,
        agent_role: &str,
        agent_id: &str,
    ) -> CoordinationResult<Option<ExecutionSlot>> {
        self.concurrency
            .acquire_slot(project, SlotRequest::new(agent_role, agent_id))
            .await
    }

    pub async fn release_execution_slot(
        &self,
        project: &Path,
        slot_id: &str,
        reason: SlotReleaseReason,
    ) -> CoordinationResult<bool> {
        Ok(self
            .concurrency
            .release_slot(project, slot_id, reason)
            .await?
            .is_some())
    }

    pub async fn register_agent_for_monitoring(
        &self,
        project: &Path,
        agent_role: &str,
        agent_id: &str,
        stage: WorkflowPhase,
    ) -> CoordinationResult<()> {
        self.monitor
            .register_agent(project, agent_role, agent_id, stage)
            .await
    }

    pub async fn update_agent_stage(
        &self,
        project: &Path,
        agent_role: &str,
        stage: WorkflowPhase,
    ) -> CoordinationResult<()> {
        self.monitor
            .update_agent_stage(project, agent_role, stage)
            .await
    }

    pub async fn unregister_agent_from_monitoring(
        &self,
        project: &Path,
        agent_role: &str,
    ) -> CoordinationResult<()> {
        self.monitor.unregister_agent(project, agent_role).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::TestContext;
    use crate::domain::agent_status::AgentStatusDocument;
    use crate::domain::error::CoordinationError;
    use crate::infrastructure::project::ProjectLayout;

    async fn to_awaiting(ctx: &TestContext, role: &str) {
        let project = ctx.project();
        ctx.phases
            .initialize_phase_state(project, role, WorkflowPhase::PlanDesign)
            .await
            .unwrap();
        ctx.phases
            .transition_phase(project, role, WorkflowPhase::AwaitingApproval, Some(role))
            .await
            .unwrap();
    }

    async fn status_of(ctx: &TestContext, role: &str) -> (Option<AgentStatus>, Option<u8>) {
        let doc: AgentStatusDocument = ctx.read(&ProjectLayout::new(ctx.project()).agent_status()).await;
        let record = doc.agent(role).cloned().unwrap_or_default();
        (record.status, record.progress)
    }

    #[tokio::test]
    async fn test_partial_then_full_approval() {
        let ctx = TestContext::new();
        to_awaiting(&ctx, "Writer").await;

        let partial = ctx
            .council
            .approve_agent_plan(ctx.project(), "Writer", "planning-lead", PowerDomain::Planning)
            .await
            .unwrap();
        assert!(partial.accepted && !partial.fully_approved);
        assert_eq!(
            status_of(&ctx, "Writer").await,
            (Some(AgentStatus::PendingVerification), Some(35))
        );

        let full = ctx
            .council
            .approve_agent_plan(ctx.project(), "Writer", "exec-lead", PowerDomain::Execution)
            .await
            .unwrap();
        assert!(full.fully_approved);
        assert_eq!(status_of(&ctx, "Writer").await, (Some(AgentStatus::Running), Some(40)));

        // Approval alone does not start execution.
        let state = ctx.phases.require_phase_state(ctx.project(), "Writer").await.unwrap();
        assert_eq!(state.current_phase, WorkflowPhase::AwaitingApproval);

        let started = ctx.council.start_execution(ctx.project(), "Writer", Some("pm")).await.unwrap();
        assert!(started.valid);
        assert_eq!(ctx.monitor.get_active_stages(ctx.project())[0].stage, WorkflowPhase::Execution);

        let decisions = ctx.decisions.by_type(ctx.project(), AGENT_PLAN_APPROVAL).await.unwrap();
        assert_eq!(decisions.len(), 2);
    }

    #[tokio::test]
    async fn test_approve_outside_awaiting_is_refused() {
        let ctx = TestContext::new();
        ctx.phases
            .initialize_phase_state(ctx.project(), "Writer", WorkflowPhase::PlanDesign)
            .await
            .unwrap();
        let outcome = ctx
            .council
            .approve_agent_plan(ctx.project(), "Writer", "pm", PowerDomain::Planning)
            .await
            .unwrap();
        assert!(!outcome.accepted);
        assert!(outcome.message.contains("not awaiting_approval"));
        assert!(ctx.decisions.history(ctx.project()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reject_returns_to_plan_design() {
        let ctx = TestContext::new();
        to_awaiting(&ctx, "Writer").await;
        ctx.council
            .approve_agent_plan(ctx.project(), "Writer", "pm", PowerDomain::Planning)
            .await
            .unwrap();

        let outcome = ctx
            .council
            .reject_agent_plan(ctx.project(), "Writer", "scope too broad", "exec-lead", PowerDomain::Execution)
            .await
            .unwrap();
        assert!(outcome.accepted);

        let status = ctx
            .council
            .get_agent_approval_status(ctx.project(), "Writer")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.current_phase, WorkflowPhase::PlanDesign);
        assert!(!status.fully_approved);
        assert_eq!(status.pending_domains.len(), 2);

        let rejections = ctx.decisions.by_type(ctx.project(), AGENT_PLAN_REJECTION).await.unwrap();
        assert_eq!(rejections[0].body.outcome, DecisionOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_reject_during_execution_keeps_approvals() {
        let ctx = TestContext::new();
        to_awaiting(&ctx, "Writer").await;
        for (approver, domain) in [("pm", PowerDomain::Planning), ("exec-lead", PowerDomain::Execution)] {
            ctx.council
                .approve_agent_plan(ctx.project(), "Writer", approver, domain)
                .await
                .unwrap();
        }
        assert!(ctx.council.start_execution(ctx.project(), "Writer", Some("pm")).await.unwrap().valid);

        let outcome = ctx
            .council
            .reject_agent_plan(ctx.project(), "Writer", "late objection", "qa-lead", PowerDomain::Quality)
            .await
            .unwrap();
        assert!(!outcome.accepted);

        let status = ctx
            .council
            .get_agent_approval_status(ctx.project(), "Writer")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.current_phase, WorkflowPhase::Execution);
        assert!(status.fully_approved);
        assert!(ctx
            .decisions
            .by_type(ctx.project(), AGENT_PLAN_REJECTION)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_reject_from_plan_design_is_refused() {
        let ctx = TestContext::new();
        ctx.phases
            .initialize_phase_state(ctx.project(), "Writer", WorkflowPhase::PlanDesign)
            .await
            .unwrap();
        let outcome = ctx
            .council
            .reject_agent_plan(ctx.project(), "Writer", "again", "pm", PowerDomain::Planning)
            .await
            .unwrap();
        assert!(!outcome.accepted);
        assert!(outcome.message.contains("plan_design"));
    }

    #[tokio::test]
    async fn test_reject_unknown_agent_is_an_error() {
        let ctx = TestContext::new();
        let err = ctx
            .council
            .reject_agent_plan(ctx.project(), "ghost", "no", "pm", PowerDomain::Planning)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::PhaseStateNotFound(_)));
    }

    #[tokio::test]
    async fn test_qa_round_trip_updates_status() {
        let ctx = TestContext::new();
        let project = ctx.project();
        ctx.council
            .submit_to_qa(project, NewSubmission::new("Writer", "w-1", "draft.md"))
            .await
            .unwrap();
        assert!(matches!(
            ctx.council
                .submit_to_qa(project, NewSubmission::new("Writer", "w-1", "draft-2.md"))
                .await,
            Err(CoordinationError::AlreadyQueued(_))
        ));
        assert_eq!(
            status_of(&ctx, "Writer").await,
            (Some(AgentStatus::PendingVerification), Some(95))
        );

        ctx.council.process_next_qa_submission(project).await.unwrap().unwrap();
        assert_eq!(
            status_of(&ctx, "Writer").await,
            (Some(AgentStatus::UnderVerification), Some(96))
        );

        ctx.council
            .complete_qa_validation(project, false, Some("missing sources".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            status_of(&ctx, "Writer").await,
            (Some(AgentStatus::ReturnedForFix), Some(85))
        );

        // Returned work may be resubmitted.
        ctx.council
            .submit_to_qa(project, NewSubmission::new("Writer", "w-1", "draft-2.md"))
            .await
            .unwrap();
        ctx.council.process_next_qa_submission(project).await.unwrap();
        ctx.council.complete_qa_validation(project, true, None).await.unwrap();
        assert_eq!(status_of(&ctx, "Writer").await, (Some(AgentStatus::Verified), Some(100)));
    }
}
