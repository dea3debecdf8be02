// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! QA submission queue document (`qa-queue.json`).
//!
//! At most one submission is ever `current`. Nothing leaves `pending` while a
//! validation is in flight unless that validation has exceeded its timeout.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::clock::EpochMillis;
use crate::domain::config::QaQueueConfig;
use crate::domain::error::{CoordinationError, QueueKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaSubmission {
    pub agent_role: String,
    pub agent_id: String,
    /// Opaque reference to what is being validated.
    pub deliverable: String,
    pub submitted_at: EpochMillis,
    /// Higher is served first. Absent means 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl QaSubmission {
    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaResult {
    Passed,
    Failed,
    Timeout,
}

impl fmt::Display for QaResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QaResult::Passed => write!(f, "passed"),
            QaResult::Failed => write!(f, "failed"),
            QaResult::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaHistoryEntry {
    pub submission: QaSubmission,
    pub started_at: EpochMillis,
    pub completed_at: EpochMillis,
    pub result: QaResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaQueueState {
    #[serde(default)]
    pub pending: Vec<QaSubmission>,
    #[serde(default)]
    pub current: Option<QaSubmission>,
    #[serde(default)]
    pub current_started_at: Option<EpochMillis>,
    #[serde(default)]
    pub history: Vec<QaHistoryEntry>,
}

/// What a dequeue attempt did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DequeueOutcome {
    /// Submission that just became `current`.
    pub started: Option<QaSubmission>,
    /// Expired in-flight validation that was force-completed first.
    pub timed_out: Option<QaHistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaQueueStatus {
    pub pending: usize,
    pub current: Option<QaSubmission>,
    pub current_elapsed: Option<i64>,
    pub history: usize,
}

impl QaQueueState {
    /// Inserts and re-sorts by priority desc, then submission time asc.
    /// Returns the 0-based position of the new entry.
    pub fn enqueue(
        &mut self,
        submission: QaSubmission,
        config: &QaQueueConfig,
    ) -> Result<usize, CoordinationError> {
        if self.pending.len() >= config.max_queue_size {
            return Err(CoordinationError::QueueFull {
                kind: QueueKind::QaSubmission,
                capacity: config.max_queue_size,
            });
        }

        let role = submission.agent_role.clone();
        let submitted_at = submission.submitted_at;
        self.pending.push(submission);
        // Stable sort keeps insertion order for exact ties.
        self.pending.sort_by(|a, b| {
            b.effective_priority()
                .cmp(&a.effective_priority())
                .then(a.submitted_at.cmp(&b.submitted_at))
        });

        Ok(self
            .pending
            .iter()
            .rposition(|s| s.agent_role == role && s.submitted_at == submitted_at)
            .unwrap_or(self.pending.len() - 1))
    }

    pub fn current_elapsed(&self, now: EpochMillis) -> Option<i64> {
        self.current
            .as_ref()
            .and(self.current_started_at)
            .map(|started| now - started)
    }

    /// Force-completes `current` as timed out if it has exceeded the budget.
    pub fn reclaim_expired_current(
        &mut self,
        now: EpochMillis,
        config: &QaQueueConfig,
    ) -> Option<QaHistoryEntry> {
        let elapsed = self.current_elapsed(now)?;
        if elapsed <= config.validation_timeout.as_millis() as i64 {
            return None;
        }
        self.finish_current(QaResult::Timeout, None, now)
    }

    /// Starts the next validation unless one is still in flight.
    pub fn dequeue(&mut self, now: EpochMillis, config: &QaQueueConfig) -> DequeueOutcome {
        let timed_out = self.reclaim_expired_current(now, config);

        if self.current.is_some() || self.pending.is_empty() {
            return DequeueOutcome {
                started: None,
                timed_out,
            };
        }

        let next = self.pending.remove(0);
        self.current = Some(next.clone());
        self.current_started_at = Some(now);
        DequeueOutcome {
            started: Some(next),
            timed_out,
        }
    }

    /// Moves `current` to history. `None` when nothing was in flight.
    pub fn complete(
        &mut self,
        result: QaResult,
        feedback: Option<String>,
        now: EpochMillis,
    ) -> Option<QaHistoryEntry> {
        self.finish_current(result, feedback, now)
    }

    pub fn is_agent_in_queue(&self, agent_role: &str) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.agent_role == agent_role)
            || self.pending.iter().any(|s| s.agent_role == agent_role)
    }

    /// Drops pending and current; history is kept.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
        self.current_started_at = None;
    }

    pub fn status(&self, now: EpochMillis) -> QaQueueStatus {
        QaQueueStatus {
            pending: self.pending.len(),
            current: self.current.clone(),
            current_elapsed: self.current_elapsed(now),
            history: self.history.len(),
        }
    }

    fn finish_current(
        &mut self,
        result: QaResult,
        feedback: Option<String>,
        now: EpochMillis,
    ) -> Option<QaHistoryEntry> {
        let submission = self.current.take()?;
        let started_at = self.current_started_at.take().unwrap_or(submission.submitted_at);
        let entry = QaHistoryEntry {
            submission,
            started_at,
            completed_at: now,
            result,
            feedback,
        };
        self.history.push(entry.clone());
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> QaQueueConfig {
        QaQueueConfig {
            max_queue_size: 3,
            validation_timeout: Duration::from_secs(60),
        }
    }

    fn submission(role: &str, at: EpochMillis, priority: Option<i32>) -> QaSubmission {
        QaSubmission {
            agent_role: role.to_string(),
            agent_id: format!("{}-1", role),
            deliverable: format!("{}/output.md", role),
            submitted_at: at,
            priority,
            metadata: None,
        }
    }

    #[test]
    fn test_priority_then_fifo_ordering() {
        let mut state = QaQueueState::default();
        let cfg = config();
        state.enqueue(submission("writer", 10, None), &cfg).unwrap();
        state.enqueue(submission("editor", 5, None), &cfg).unwrap();
        let pos = state.enqueue(submission("producer", 20, Some(2)), &cfg).unwrap();
        assert_eq!(pos, 0);

        let order: Vec<_> = state.pending.iter().map(|s| s.agent_role.as_str()).collect();
        assert_eq!(order, vec!["producer", "editor", "writer"]);
    }

    #[test]
    fn test_enqueue_rejects_when_full() {
        let mut state = QaQueueState::default();
        let cfg = config();
        for i in 0..3 {
            state.enqueue(submission(&format!("a{}", i), i, None), &cfg).unwrap();
        }
        let err = state.enqueue(submission("late", 9, None), &cfg).unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::QueueFull { kind: QueueKind::QaSubmission, .. }
        ));
    }

    #[test]
    fn test_single_flight() {
        let mut state = QaQueueState::default();
        let cfg = config();
        state.enqueue(submission("a", 1, None), &cfg).unwrap();
        state.enqueue(submission("b", 2, None), &cfg).unwrap();

        let first = state.dequeue(100, &cfg);
        assert_eq!(first.started.unwrap().agent_role, "a");

        // Still within the validation timeout.
        let second = state.dequeue(30_000, &cfg);
        assert!(second.started.is_none());
        assert!(second.timed_out.is_none());
        assert_eq!(state.current.as_ref().unwrap().agent_role, "a");

        state.complete(QaResult::Passed, None, 40_000).unwrap();
        let third = state.dequeue(41_000, &cfg);
        assert_eq!(third.started.unwrap().agent_role, "b");
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn test_expired_current_is_reclaimed_even_with_empty_pending() {
        let mut state = QaQueueState::default();
        let cfg = config();
        state.enqueue(submission("a", 1, None), &cfg).unwrap();
        state.dequeue(1_000, &cfg);

        let outcome = state.dequeue(62_000, &cfg);
        assert!(outcome.started.is_none());
        let timed_out = outcome.timed_out.unwrap();
        assert_eq!(timed_out.result, QaResult::Timeout);
        assert_eq!(timed_out.started_at, 1_000);
        assert!(state.current.is_none());
        assert!(state.current_started_at.is_none());
    }

    #[test]
    fn test_complete_without_current_is_noop() {
        let mut state = QaQueueState::default();
        assert!(state.complete(QaResult::Failed, None, 5).is_none());
        assert!(state.history.is_empty());
    }

    #[test]
    fn test_is_agent_in_queue_checks_current_and_pending() {
        let mut state = QaQueueState::default();
        let cfg = config();
        state.enqueue(submission("a", 1, None), &cfg).unwrap();
        state.enqueue(submission("b", 2, None), &cfg).unwrap();
        state.dequeue(10, &cfg);

        assert!(state.is_agent_in_queue("a"));
        assert!(state.is_agent_in_queue("b"));
        assert!(!state.is_agent_in_queue("c"));

        state.clear();
        assert!(!state.is_agent_in_queue("a"));
        assert_eq!(state.status(20).pending, 0);
    }

    #[test]
    fn test_status_reports_elapsed() {
        let mut state = QaQueueState::default();
        let cfg = config();
        state.enqueue(submission("a", 1, None), &cfg).unwrap();
        state.dequeue(1_000, &cfg);
        let status = state.status(4_000);
        assert_eq!(status.current_elapsed, Some(3_000));
        assert_eq!(status.pending, 0);
    }
}
