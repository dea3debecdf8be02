// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! QA Queue Service
//!
//! Serializes validation of deliverables: submissions wait in
//! `qa-queue.json` ordered by priority, and exactly one is validated at a
//! time. A validation that outlives the configured timeout is completed as
//! `timeout` the next time anyone asks for work.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::clock::Clock;
use crate::domain::config::QaQueueConfig;
use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::events::CoordinationEvent;
use crate::domain::qa::{QaHistoryEntry, QaQueueState, QaQueueStatus, QaResult, QaSubmission};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::json_store::DocumentStore;
use crate::infrastructure::project::ProjectLayout;

/// What an agent hands in for validation.
#[derive(Debug, Clone, Default)]
pub struct NewSubmission {
    pub agent_role: String,
    pub agent_id: String,
    pub deliverable: String,
    pub priority: Option<i32>,
    pub metadata: Option<serde_json::Value>,
}

impl NewSubmission {
    pub fn new(
        agent_role: impl Into<String>,
        agent_id: impl Into<String>,
        deliverable: impl Into<String>,
    ) -> Self {
        Self {
            agent_role: agent_role.into(),
            agent_id: agent_id.into(),
            deliverable: deliverable.into(),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

pub struct QaQueueService {
    store: DocumentStore,
    clock: Arc<dyn Clock>,
    config: QaQueueConfig,
    event_bus: EventBus,
}

impl QaQueueService {
    pub fn new(
        store: DocumentStore,
        clock: Arc<dyn Clock>,
        config: QaQueueConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            event_bus,
        }
    }

    /// Queues a submission and returns its 0-based position.
    pub async fn enqueue_submission(
        &self,
        project: &Path,
        submission: NewSubmission,
    ) -> CoordinationResult<usize> {
        self.enqueue(project, submission, false).await
    }

    /// Like [`enqueue_submission`](Self::enqueue_submission), but refuses
    /// with [`CoordinationError::AlreadyQueued`] if the role is already
    /// pending or under validation. The check and the insert share one
    /// critical section.
    pub async fn enqueue_unique(
        &self,
        project: &Path,
        submission: NewSubmission,
    ) -> CoordinationResult<usize> {
        self.enqueue(project, submission, true).await
    }

    async fn enqueue(
        &self,
        project: &Path,
        submission: NewSubmission,
        unique: bool,
    ) -> CoordinationResult<usize> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();
        let agent_role = submission.agent_role.clone();
        let entry = QaSubmission {
            agent_role: submission.agent_role,
            agent_id: submission.agent_id,
            deliverable: submission.deliverable,
            submitted_at: now,
            priority: submission.priority,
            metadata: submission.metadata,
        };

        let position = self
            .store
            .update(
                &layout.state_lock(),
                &layout.qa_queue(),
                |queue: &mut QaQueueState| {
                    if unique && queue.is_agent_in_queue(&entry.agent_role) {
                        return Err(CoordinationError::AlreadyQueued(entry.agent_role.clone()));
                    }
                    queue.enqueue(entry, &self.config)
                },
            )
            .await?;

        info!(agent_role = %agent_role, position, "Queued QA submission");
        metrics::counter!("council_qa_submissions_total").increment(1);
        self.event_bus.publish(CoordinationEvent::QaSubmitted {
            project: project.to_path_buf(),
            agent_role,
            position,
            at: now,
        });
        Ok(position)
    }

    /// Starts validating the next submission. `None` when the queue is empty
    /// or a validation is already in flight.
    pub async fn dequeue_submission(&self, project: &Path) -> CoordinationResult<Option<QaSubmission>> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();
        let config = self.config.clone();

        let outcome = self
            .store
            .update(
                &layout.state_lock(),
                &layout.qa_queue(),
                |queue: &mut QaQueueState| Ok(queue.dequeue(now, &config)),
            )
            .await?;

        if let Some(expired) = &outcome.timed_out {
            warn!(
                agent_role = %expired.submission.agent_role,
                elapsed_ms = expired.completed_at - expired.started_at,
                "QA validation exceeded its timeout"
            );
            metrics::counter!("council_qa_timeouts_total").increment(1);
            self.publish_completed(project, expired);
        }

        if let Some(started) = &outcome.started {
            info!(agent_role = %started.agent_role, "Started QA validation");
            self.event_bus.publish(CoordinationEvent::QaStarted {
                project: project.to_path_buf(),
                agent_role: started.agent_role.clone(),
                at: now,
            });
        }
        Ok(outcome.started)
    }

    /// Finishes the in-flight validation. `None`, with a warning, when
    /// nothing was being validated.
    pub async fn complete_validation(
        &self,
        project: &Path,
        result: QaResult,
        feedback: Option<String>,
    ) -> CoordinationResult<Option<QaHistoryEntry>> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();

        let entry = self
            .store
            .update(
                &layout.state_lock(),
                &layout.qa_queue(),
                |queue: &mut QaQueueState| Ok(queue.complete(result, feedback, now)),
            )
            .await?;

        match &entry {
            Some(entry) => {
                info!(agent_role = %entry.submission.agent_role, %result, "Completed QA validation");
                self.publish_completed(project, entry);
            }
            None => warn!(%result, "No QA validation in progress"),
        }
        Ok(entry)
    }

    fn publish_completed(&self, project: &Path, entry: &QaHistoryEntry) {
        self.event_bus.publish(CoordinationEvent::QaCompleted {
            project: project.to_path_buf(),
            agent_role: entry.submission.agent_role.clone(),
            result: entry.result,
            at: entry.completed_at,
        });
    }

    /// Drops pending and current submissions; history is kept.
    pub async fn clear_queue(&self, project: &Path) -> CoordinationResult<()> {
        let layout = ProjectLayout::new(project);
        self.store
            .update(
                &layout.state_lock(),
                &layout.qa_queue(),
                |queue: &mut QaQueueState| {
                    queue.clear();
                    Ok(())
                },
            )
            .await?;
        warn!("Cleared QA queue");
        Ok(())
    }

    async fn snapshot(&self, project: &Path) -> CoordinationResult<QaQueueState> {
        self.store.read(&ProjectLayout::new(project).qa_queue()).await
    }

    pub async fn queue_status(&self, project: &Path) -> CoordinationResult<QaQueueStatus> {
        Ok(self.snapshot(project).await?.status(self.clock.now_millis()))
    }

    pub async fn pending_submissions(&self, project: &Path) -> CoordinationResult<Vec<QaSubmission>> {
        Ok(self.snapshot(project).await?.pending)
    }

    pub async fn history(&self, project: &Path) -> CoordinationResult<Vec<QaHistoryEntry>> {
        Ok(self.snapshot(project).await?.history)
    }

    pub async fn is_agent_in_queue(&self, project: &Path, agent_role: &str) -> CoordinationResult<bool> {
        Ok(self.snapshot(project).await?.is_agent_in_queue(agent_role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support;
    use crate::domain::clock::ManualClock;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service(clock: Arc<ManualClock>, max_queue: usize) -> QaQueueService {
        QaQueueService::new(
            test_support::patient_store(),
            clock,
            QaQueueConfig {
                max_queue_size: max_queue,
                validation_timeout: Duration::from_secs(30 * 60),
            },
            EventBus::new(64),
        )
    }

    #[tokio::test]
    async fn test_priority_order_and_single_flight() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(0);
        let qa = service(clock.clone(), 10);

        qa.enqueue_submission(dir.path(), NewSubmission::new("Writer", "w", "draft.md"))
            .await
            .unwrap();
        clock.advance_secs(1);
        let position = qa
            .enqueue_submission(
                dir.path(),
                NewSubmission::new("Editor", "e", "edit.md").with_priority(5),
            )
            .await
            .unwrap();
        assert_eq!(position, 0);

        let first = qa.dequeue_submission(dir.path()).await.unwrap().unwrap();
        assert_eq!(first.agent_role, "Editor");
        assert!(qa.dequeue_submission(dir.path()).await.unwrap().is_none());

        qa.complete_validation(dir.path(), QaResult::Passed, None)
            .await
            .unwrap()
            .unwrap();
        let second = qa.dequeue_submission(dir.path()).await.unwrap().unwrap();
        assert_eq!(second.agent_role, "Writer");
    }

    #[tokio::test]
    async fn test_expired_validation_is_reclaimed_on_dequeue() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(0);
        let qa = service(clock.clone(), 10);

        qa.enqueue_submission(dir.path(), NewSubmission::new("Writer", "w", "draft.md"))
            .await
            .unwrap();
        qa.dequeue_submission(dir.path()).await.unwrap().unwrap();

        clock.advance_secs(31 * 60);
        // Nothing pending, but the expired validation must still be recorded.
        assert!(qa.dequeue_submission(dir.path()).await.unwrap().is_none());

        let history = qa.history(dir.path()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].result, QaResult::Timeout);
        assert!(qa.queue_status(dir.path()).await.unwrap().current.is_none());
    }

    #[tokio::test]
    async fn test_complete_without_current_returns_none() {
        let dir = TempDir::new().unwrap();
        let qa = service(ManualClock::new(0), 10);
        let entry = qa
            .complete_validation(dir.path(), QaResult::Failed, Some("missing".into()))
            .await
            .unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn test_unique_enqueue_and_capacity() {
        let dir = TempDir::new().unwrap();
        let qa = service(ManualClock::new(0), 1);

        qa.enqueue_unique(dir.path(), NewSubmission::new("Writer", "w", "a"))
            .await
            .unwrap();
        let duplicate = qa
            .enqueue_unique(dir.path(), NewSubmission::new("Writer", "w", "b"))
            .await
            .unwrap_err();
        assert!(matches!(duplicate, CoordinationError::AlreadyQueued(_)));

        let full = qa
            .enqueue_submission(dir.path(), NewSubmission::new("Editor", "e", "c"))
            .await
            .unwrap_err();
        assert!(matches!(full, CoordinationError::QueueFull { capacity: 1, .. }));
        assert!(qa.is_agent_in_queue(dir.path(), "Writer").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_keeps_history() {
        let dir = TempDir::new().unwrap();
        let qa = service(ManualClock::new(0), 10);
        for role in ["A", "B", "C"] {
            qa.enqueue_submission(dir.path(), NewSubmission::new(role, role, "x"))
                .await
                .unwrap();
        }
        qa.dequeue_submission(dir.path()).await.unwrap();
        qa.complete_validation(dir.path(), QaResult::Passed, None)
            .await
            .unwrap();
        qa.dequeue_submission(dir.path()).await.unwrap();

        qa.clear_queue(dir.path()).await.unwrap();
        let status = qa.queue_status(dir.path()).await.unwrap();
        assert_eq!(status.pending, 0);
        assert!(status.current.is_none());
        assert_eq!(status.history, 1);
    }
}
