// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Resource Lifecycle Manager
//!
//! Tears down everything an agent holds when it finishes, fails, times out
//! or is aborted. Steps run in a fixed order and each one is attempted even
//! if an earlier one failed; the outcome of every step is returned in a
//! [`CleanupReport`] rather than raised.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::application::concurrency_service::ConcurrencyManager;
use crate::application::phase_service::PhaseStateService;
use crate::application::timeout_monitor::TimeoutMonitor;
use crate::domain::agent_status::{AgentStatusUpdate, CleanupReason};
use crate::domain::clock::Clock;
use crate::domain::error::CoordinationResult;
use crate::domain::events::CoordinationEvent;
use crate::domain::phase::WorkflowPhase;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::status_board::{ActivityEntry, ActivityKind, StatusBoard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    TimeoutMonitor,
    ConcurrencySlot,
    WaitQueue,
    PhaseState,
    StatusBoard,
    Logging,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CleanupStep::TimeoutMonitor => "timeout_monitor",
            CleanupStep::ConcurrencySlot => "concurrency_slot",
            CleanupStep::WaitQueue => "wait_queue",
            CleanupStep::PhaseState => "phase_state",
            CleanupStep::StatusBoard => "status_board",
            CleanupStep::Logging => "logging",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub agent_role: String,
    pub reason: CleanupReason,
    pub steps: Vec<(CleanupStep, StepOutcome)>,
}

impl CleanupReport {
    fn new(agent_role: &str, reason: CleanupReason) -> Self {
        Self {
            agent_role: agent_role.to_string(),
            reason,
            steps: Vec::new(),
        }
    }

    fn record<E: fmt::Display>(&mut self, step: CleanupStep, result: Result<StepOutcome, E>) {
        let outcome = result.unwrap_or_else(|e| {
            warn!(agent_role = %self.agent_role, %step, error = %e, "Cleanup step failed");
            StepOutcome::Failed(e.to_string())
        });
        self.steps.push((step, outcome));
    }

    pub fn outcome(&self, step: CleanupStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    pub fn succeeded(&self) -> Vec<CleanupStep> {
        self.steps
            .iter()
            .filter(|(_, o)| *o == StepOutcome::Succeeded)
            .map(|(s, _)| *s)
            .collect()
    }

    pub fn failed(&self) -> Vec<(CleanupStep, &str)> {
        self.steps
            .iter()
            .filter_map(|(s, o)| match o {
                StepOutcome::Failed(e) => Some((*s, e.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed().is_empty()
    }
}

/// What to tear down.
#[derive(Debug, Clone)]
pub struct CleanupRequest {
    pub agent_role: String,
    pub agent_id: String,
    pub slot_id: Option<String>,
    pub reason: CleanupReason,
    /// Merged into the agent's final status record.
    pub metadata: Map<String, Value>,
}

impl CleanupRequest {
    pub fn new(agent_role: impl Into<String>, agent_id: impl Into<String>, reason: CleanupReason) -> Self {
        Self {
            agent_role: agent_role.into(),
            agent_id: agent_id.into(),
            slot_id: None,
            reason,
            metadata: Map::new(),
        }
    }

    pub fn with_slot(mut self, slot_id: Option<String>) -> Self {
        self.slot_id = slot_id;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

pub struct ResourceLifecycleManager {
    monitor: Arc<TimeoutMonitor>,
    concurrency: Arc<ConcurrencyManager>,
    phases: Arc<PhaseStateService>,
    status_board: Arc<dyn StatusBoard>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl ResourceLifecycleManager {
    pub fn new(
        monitor: Arc<TimeoutMonitor>,
        concurrency: Arc<ConcurrencyManager>,
        phases: Arc<PhaseStateService>,
        status_board: Arc<dyn StatusBoard>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            monitor,
            concurrency,
            phases,
            status_board,
            clock,
            event_bus,
        }
    }

    pub async fn cleanup_agent(&self, project: &Path, request: CleanupRequest) -> CleanupReport {
        let role = request.agent_role.as_str();
        let reason = request.reason;
        let mut report = CleanupReport::new(role, reason);
        info!(agent_role = role, %reason, "Cleaning up agent resources");

        report.record(
            CleanupStep::TimeoutMonitor,
            self.monitor
                .unregister_agent(project, role)
                .await
                .map(|_| StepOutcome::Succeeded),
        );

        let slot_step = match &request.slot_id {
            None => Ok(StepOutcome::Skipped("no slot held".to_string())),
            Some(slot_id) => self
                .concurrency
                .release_slot(project, slot_id, reason.slot_release_reason())
                .await
                .map(|released| match released {
                    Some(_) => StepOutcome::Succeeded,
                    None => StepOutcome::Skipped(format!("slot {} already released", slot_id)),
                }),
        };
        report.record(CleanupStep::ConcurrencySlot, slot_step);

        report.record(
            CleanupStep::WaitQueue,
            self.concurrency
                .leave_wait_queue(project, role, &request.agent_id)
                .await
                .map(|removed| {
                    if removed {
                        StepOutcome::Succeeded
                    } else {
                        StepOutcome::Skipped("not waiting for a slot".to_string())
                    }
                }),
        );

        report.record(CleanupStep::PhaseState, self.close_phase(project, role, reason).await);

        let (status, stage, progress) = reason.final_status();
        let mut update = AgentStatusUpdate::new(status, stage, progress)
            .with_field("completedAt", json!(self.clock.now_millis()))
            .with_field("cleanupReason", json!(reason.as_str()));
        for (key, value) in &request.metadata {
            update = update.with_field(key.clone(), value.clone());
        }
        report.record(
            CleanupStep::StatusBoard,
            self.status_board
                .update_agent_status(project, role, update)
                .await
                .map(|_| StepOutcome::Succeeded),
        );

        let failed_so_far: Vec<String> = report.failed().iter().map(|(s, _)| s.to_string()).collect();
        let entry = ActivityEntry {
            kind: ActivityKind::Event,
            message: format!("{} cleaned up ({})", role, reason),
            who: Some(request.agent_id.clone()),
            at: self.clock.now_millis(),
            details: Some(json!({
                "agentRole": role,
                "slotId": request.slot_id,
                "reason": reason.as_str(),
                "failedSteps": failed_so_far,
                "metadata": request.metadata,
            })),
        };
        report.record(
            CleanupStep::Logging,
            self.status_board
                .log_event(project, entry)
                .await
                .map(|_| StepOutcome::Succeeded),
        );

        let failed = report.failed();
        if failed.is_empty() {
            info!(agent_role = role, %reason, "Agent cleanup complete");
        } else {
            let steps: Vec<String> = failed.iter().map(|(s, _)| s.to_string()).collect();
            warn!(
                agent_role = role,
                %reason,
                failed_steps = %steps.join(", "),
                "Agent cleanup finished with failures"
            );
        }
        metrics::counter!("council_cleanups_total", "reason" => reason.as_str()).increment(1);
        self.event_bus.publish(CoordinationEvent::AgentCleanedUp {
            project: project.to_path_buf(),
            agent_role: role.to_string(),
            reason,
            failed_steps: failed.len(),
            at: self.clock.now_millis(),
        });
        report
    }

    async fn close_phase(
        &self,
        project: &Path,
        agent_role: &str,
        reason: CleanupReason,
    ) -> CoordinationResult<StepOutcome> {
        let Some(state) = self.phases.get_phase_state(project, agent_role).await? else {
            return Ok(StepOutcome::Skipped("no phase state".to_string()));
        };
        match state.current_phase {
            WorkflowPhase::Completion => {
                return Ok(StepOutcome::Skipped("already in completion".to_string()))
            }
            WorkflowPhase::Execution => {}
            // Only execution has an edge to completion.
            other => {
                return Ok(StepOutcome::Skipped(format!(
                    "cannot close from {} phase",
                    other
                )))
            }
        }

        let trigger = format!("cleanup:{}", reason);
        let result = self
            .phases
            .transition_phase(project, agent_role, WorkflowPhase::Completion, Some(&trigger))
            .await?;
        Ok(if result.valid {
            StepOutcome::Succeeded
        } else {
            StepOutcome::Failed(result.reason.unwrap_or_default())
        })
    }

    pub async fn cleanup_agent_on_completion(
        &self,
        project: &Path,
        agent_role: &str,
        agent_id: &str,
        slot_id: Option<String>,
        deliverable: Option<&str>,
    ) -> CleanupReport {
        let request = CleanupRequest::new(agent_role, agent_id, CleanupReason::Completed)
            .with_slot(slot_id)
            .with_metadata("deliverable", json!(deliverable))
            .with_metadata("completionTime", json!(self.clock.now_millis()));
        self.cleanup_agent(project, request).await
    }

    pub async fn cleanup_agent_on_failure(
        &self,
        project: &Path,
        agent_role: &str,
        agent_id: &str,
        slot_id: Option<String>,
        error: &str,
    ) -> CleanupReport {
        let request = CleanupRequest::new(agent_role, agent_id, CleanupReason::Failed)
            .with_slot(slot_id)
            .with_metadata("error", json!(error))
            .with_metadata("failureTime", json!(self.clock.now_millis()));
        self.cleanup_agent(project, request).await
    }

    pub async fn cleanup_agent_on_timeout(
        &self,
        project: &Path,
        agent_role: &str,
        agent_id: &str,
        slot_id: Option<String>,
        elapsed_ms: i64,
    ) -> CleanupReport {
        let request = CleanupRequest::new(agent_role, agent_id, CleanupReason::Timeout)
            .with_slot(slot_id)
            .with_metadata("elapsedTime", json!(elapsed_ms))
            .with_metadata("timeoutTime", json!(self.clock.now_millis()));
        self.cleanup_agent(project, request).await
    }

    pub async fn cleanup_agent_on_abort(
        &self,
        project: &Path,
        agent_role: &str,
        agent_id: &str,
        slot_id: Option<String>,
        abort_reason: &str,
    ) -> CleanupReport {
        let request = CleanupRequest::new(agent_role, agent_id, CleanupReason::Aborted)
            .with_slot(slot_id)
            .with_metadata("abortReason", json!(abort_reason))
            .with_metadata("abortTime", json!(self.clock.now_millis()));
        self.cleanup_agent(project, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::concurrency_service::SlotRequest;
    use crate::application::test_support::TestContext;
    use crate::domain::agent_status::{AgentStatus, AgentStatusDocument};
    use crate::domain::concurrency::{ConcurrencyState, SlotReleaseReason};
    use crate::infrastructure::project::ProjectLayout;

    #[tokio::test]
    async fn test_completion_releases_everything() {
        let ctx = TestContext::new();
        let project = ctx.project();
        ctx.phases
            .initialize_phase_state(project, "Writer", WorkflowPhase::Execution)
            .await
            .unwrap();
        ctx.monitor
            .register_agent(project, "Writer", "w-1", WorkflowPhase::Execution)
            .await
            .unwrap();
        let slot = ctx
            .concurrency
            .acquire_slot(project, SlotRequest::new("Writer", "w-1"))
            .await
            .unwrap()
            .unwrap();

        let report = ctx
            .lifecycle
            .cleanup_agent_on_completion(project, "Writer", "w-1", Some(slot.slot_id), Some("draft.md"))
            .await;
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.succeeded().len(), 5);

        assert!(ctx.concurrency.get_active_slots(project).await.unwrap().is_empty());
        assert_eq!(ctx.monitor.get_monitor_stats().active_agents, 0);
        let state = ctx.phases.require_phase_state(project, "Writer").await.unwrap();
        assert_eq!(state.current_phase, WorkflowPhase::Completion);
        assert_eq!(
            state.transition_history.last().unwrap().triggered_by.as_deref(),
            Some("cleanup:completed")
        );

        let doc: AgentStatusDocument = ctx.read(&ProjectLayout::new(project).agent_status()).await;
        let record = doc.agent("Writer").unwrap();
        assert_eq!(record.status, Some(AgentStatus::Completed));
        assert_eq!(record.progress, Some(100));
        assert_eq!(record.extra["cleanupReason"], json!("completed"));
        assert_eq!(record.extra["deliverable"], json!("draft.md"));
    }

    #[tokio::test]
    async fn test_skips_missing_slot_and_completed_phase() {
        let ctx = TestContext::new();
        let project = ctx.project();
        ctx.phases
            .initialize_phase_state(project, "Writer", WorkflowPhase::Completion)
            .await
            .unwrap();

        let report = ctx
            .lifecycle
            .cleanup_agent_on_abort(project, "Writer", "w-1", None, "operator request")
            .await;
        assert!(matches!(
            report.outcome(CleanupStep::ConcurrencySlot),
            Some(StepOutcome::Skipped(_))
        ));
        assert!(matches!(
            report.outcome(CleanupStep::PhaseState),
            Some(StepOutcome::Skipped(_))
        ));
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_failed_step_does_not_stop_later_steps() {
        let ctx = TestContext::new();
        let project = ctx.project();
        ctx.phases
            .initialize_phase_state(project, "Writer", WorkflowPhase::PlanDesign)
            .await
            .unwrap();
        std::fs::write(ProjectLayout::new(project).concurrency_state(), "{ broken").unwrap();

        let report = ctx
            .lifecycle
            .cleanup_agent_on_failure(project, "Writer", "w-1", Some("slot-1-abc".into()), "boom")
            .await;

        let failed: Vec<CleanupStep> = report.failed().into_iter().map(|(s, _)| s).collect();
        assert_eq!(failed, vec![CleanupStep::ConcurrencySlot, CleanupStep::WaitQueue]);
        assert!(matches!(
            report.outcome(CleanupStep::PhaseState),
            Some(StepOutcome::Skipped(reason)) if reason.contains("plan_design")
        ));
        assert_eq!(report.outcome(CleanupStep::StatusBoard), Some(&StepOutcome::Succeeded));
        assert_eq!(report.outcome(CleanupStep::Logging), Some(&StepOutcome::Succeeded));

        let doc: AgentStatusDocument = ctx.read(&ProjectLayout::new(project).agent_status()).await;
        let record = doc.agent("Writer").unwrap();
        assert_eq!(record.status, Some(AgentStatus::Failed));
        assert_eq!(record.extra["error"], json!("boom"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_queued_agent() {
        let ctx = TestContext::new();
        let project = ctx.project();
        let max = ctx.concurrency.config().max_concurrent_agents;
        for i in 0..max {
            ctx.concurrency
                .acquire_slot(project, SlotRequest::new(format!("Holder{}", i), format!("h-{}", i)))
                .await
                .unwrap()
                .unwrap();
        }
        assert!(ctx
            .concurrency
            .acquire_slot(project, SlotRequest::new("Writer", "w-1"))
            .await
            .unwrap()
            .is_none());

        let report = ctx
            .lifecycle
            .cleanup_agent_on_abort(project, "Writer", "w-1", None, "operator request")
            .await;
        assert_eq!(report.outcome(CleanupStep::WaitQueue), Some(&StepOutcome::Succeeded));
        assert!(ctx.concurrency.get_waiting_agents(project).await.unwrap().is_empty());
        assert_eq!(
            ctx.concurrency.get_active_slots(project).await.unwrap().len(),
            max
        );
    }

    #[tokio::test]
    async fn test_timeout_cleanup_records_slot_reason() {
        let ctx = TestContext::new();
        let project = ctx.project();
        let slot = ctx
            .concurrency
            .acquire_slot(project, SlotRequest::new("Writer", "w-1"))
            .await
            .unwrap()
            .unwrap();

        let report = ctx
            .lifecycle
            .cleanup_agent_on_timeout(project, "Writer", "w-1", Some(slot.slot_id), 1_900_000)
            .await;
        assert!(matches!(
            report.outcome(CleanupStep::PhaseState),
            Some(StepOutcome::Skipped(_))
        ));

        let state: ConcurrencyState = ctx.read(&ProjectLayout::new(project).concurrency_state()).await;
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].reason, SlotReleaseReason::Timeout);
    }
}
