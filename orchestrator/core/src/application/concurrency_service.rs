// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Concurrency Manager
//!
//! Bounds how many agents execute at once per project. Admission state lives
//! in `concurrency-state.json`; every mutation runs under the project state
//! lock, so the bound holds across processes sharing the project directory.
//!
//! Slots are never held forever: each admission first reclaims slots older
//! than the slot timeout, recording them in history as `timeout`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::clock::Clock;
use crate::domain::concurrency::{
    AcquireOutcome, ConcurrencyState, ConcurrencyStatus, ExecutionSlot, SlotReleaseReason,
    WaitingAgent,
};
use crate::domain::config::{ConcurrencyConfig, ConcurrencyOverrides};
use crate::domain::error::CoordinationResult;
use crate::domain::events::CoordinationEvent;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::json_store::DocumentStore;
use crate::infrastructure::project::ProjectLayout;

/// An admission request. Overrides take precedence over the manager's
/// resolved configuration for this call only.
#[derive(Debug, Clone, Default)]
pub struct SlotRequest {
    pub agent_role: String,
    pub agent_id: String,
    pub metadata: Option<serde_json::Value>,
    pub overrides: ConcurrencyOverrides,
}

impl SlotRequest {
    pub fn new(agent_role: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            agent_role: agent_role.into(),
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_overrides(mut self, overrides: ConcurrencyOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

pub struct ConcurrencyManager {
    store: DocumentStore,
    clock: Arc<dyn Clock>,
    config: ConcurrencyConfig,
    event_bus: EventBus,
    released: Notify,
}

impl ConcurrencyManager {
    pub fn new(
        store: DocumentStore,
        clock: Arc<dyn Clock>,
        config: ConcurrencyConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            event_bus,
            released: Notify::new(),
        }
    }

    pub fn config(&self) -> &ConcurrencyConfig {
        &self.config
    }

    /// Tries to admit the agent. Returns the granted slot, or `None` when the
    /// agent was queued instead. A full wait queue is
    /// [`CoordinationError::QueueFull`](crate::domain::error::CoordinationError::QueueFull).
    pub async fn acquire_slot(
        &self,
        project: &Path,
        request: SlotRequest,
    ) -> CoordinationResult<Option<ExecutionSlot>> {
        let layout = ProjectLayout::new(project);
        let config = request.overrides.resolve(&self.config);
        let now = self.clock.now_millis();

        // Reclaimed slots must be persisted even when admission fails.
        let (reclaimed, outcome) = self
            .store
            .update(
                &layout.state_lock(),
                &layout.concurrency_state(),
                |state: &mut ConcurrencyState| {
                    let reclaimed = state.reclaim_expired(now, &config);
                    let outcome = state.try_acquire(
                        &request.agent_role,
                        &request.agent_id,
                        request.metadata.clone(),
                        now,
                        &config,
                    );
                    Ok((reclaimed, outcome))
                },
            )
            .await?;

        for slot in &reclaimed {
            warn!(
                slot_id = %slot.slot_id,
                agent_role = %slot.agent_role,
                age_ms = slot.age_millis(now),
                "Reclaimed expired execution slot"
            );
            metrics::counter!("council_slots_reclaimed_total").increment(1);
            self.event_bus.publish(CoordinationEvent::SlotReleased {
                project: project.to_path_buf(),
                slot_id: slot.slot_id.clone(),
                agent_role: slot.agent_role.clone(),
                reason: SlotReleaseReason::Timeout,
                at: now,
            });
        }

        match outcome? {
            AcquireOutcome::Granted(slot) => {
                info!(
                    slot_id = %slot.slot_id,
                    agent_role = %request.agent_role,
                    "Acquired execution slot"
                );
                metrics::counter!("council_slots_acquired_total").increment(1);
                self.event_bus.publish(CoordinationEvent::SlotAcquired {
                    project: project.to_path_buf(),
                    slot_id: slot.slot_id.clone(),
                    agent_role: request.agent_role.clone(),
                    agent_id: request.agent_id.clone(),
                    at: now,
                });
                Ok(Some(slot))
            }
            AcquireOutcome::Queued { position } => {
                info!(
                    agent_role = %request.agent_role,
                    position,
                    "No execution slot available, agent queued"
                );
                metrics::counter!("council_slots_queued_total").increment(1);
                self.event_bus.publish(CoordinationEvent::SlotQueued {
                    project: project.to_path_buf(),
                    agent_role: request.agent_role.clone(),
                    agent_id: request.agent_id.clone(),
                    position,
                    at: now,
                });
                Ok(None)
            }
        }
    }

    /// Releases a slot. Releasing an unknown slot is a warning, not an error.
    pub async fn release_slot(
        &self,
        project: &Path,
        slot_id: &str,
        reason: SlotReleaseReason,
    ) -> CoordinationResult<Option<ExecutionSlot>> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();

        let released = self
            .store
            .update(
                &layout.state_lock(),
                &layout.concurrency_state(),
                |state: &mut ConcurrencyState| Ok(state.release(slot_id, reason, now)),
            )
            .await?;

        match &released {
            Some(slot) => {
                info!(slot_id, agent_role = %slot.agent_role, %reason, "Released execution slot");
                self.event_bus.publish(CoordinationEvent::SlotReleased {
                    project: project.to_path_buf(),
                    slot_id: slot_id.to_string(),
                    agent_role: slot.agent_role.clone(),
                    reason,
                    at: now,
                });
                self.released.notify_waiters();
            }
            None => warn!(slot_id, "Release requested for unknown execution slot"),
        }
        Ok(released)
    }

    /// Re-attempts admission until a slot is granted or `cancel` fires.
    ///
    /// Wakes on every local release and otherwise every `poll_interval`,
    /// which covers releases made by other processes.
    pub async fn wait_for_slot(
        &self,
        project: &Path,
        request: SlotRequest,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> CoordinationResult<Option<ExecutionSlot>> {
        loop {
            let notified = self.released.notified();
            if let Some(slot) = self.acquire_slot(project, request.clone()).await? {
                return Ok(Some(slot));
            }

            debug!(agent_role = %request.agent_role, "Waiting for execution slot");
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.leave_wait_queue(project, &request.agent_role, &request.agent_id)
                        .await?;
                    info!(agent_role = %request.agent_role, "Stopped waiting for execution slot");
                    return Ok(None);
                }
                _ = notified => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Takes the agent out of the wait queue. `false` if it was not waiting.
    pub async fn leave_wait_queue(
        &self,
        project: &Path,
        agent_role: &str,
        agent_id: &str,
    ) -> CoordinationResult<bool> {
        let layout = ProjectLayout::new(project);
        let removed = self
            .store
            .update(
                &layout.state_lock(),
                &layout.concurrency_state(),
                |state: &mut ConcurrencyState| Ok(state.remove_waiter(agent_role, agent_id)),
            )
            .await?;
        if removed {
            info!(agent_role, agent_id, "Left execution slot wait queue");
        }
        Ok(removed)
    }

    /// Force-releases every slot and empties the wait queue. Administrative.
    pub async fn clear_all_slots(&self, project: &Path) -> CoordinationResult<usize> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();
        let cleared = self
            .store
            .update(
                &layout.state_lock(),
                &layout.concurrency_state(),
                |state: &mut ConcurrencyState| Ok(state.clear_all(now)),
            )
            .await?;

        warn!(cleared, "Cleared all execution slots");
        self.released.notify_waiters();
        Ok(cleared)
    }

    async fn snapshot(&self, project: &Path) -> CoordinationResult<ConcurrencyState> {
        self.store
            .read(&ProjectLayout::new(project).concurrency_state())
            .await
    }

    pub async fn get_concurrency_status(&self, project: &Path) -> CoordinationResult<ConcurrencyStatus> {
        Ok(self.snapshot(project).await?.status(&self.config))
    }

    pub async fn get_available_slots(&self, project: &Path) -> CoordinationResult<usize> {
        Ok(self.snapshot(project).await?.available(&self.config))
    }

    pub async fn get_active_slots(&self, project: &Path) -> CoordinationResult<Vec<ExecutionSlot>> {
        Ok(self.snapshot(project).await?.active_slots)
    }

    pub async fn get_waiting_agents(&self, project: &Path) -> CoordinationResult<Vec<WaitingAgent>> {
        Ok(self.snapshot(project).await?.wait_queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::application::test_support;
    use crate::domain::error::CoordinationError;
    use tempfile::TempDir;

    fn config(max: usize, queue: usize) -> ConcurrencyConfig {
        ConcurrencyConfig {
            max_concurrent_agents: max,
            max_queue_size: queue,
            slot_timeout: Duration::from_secs(30 * 60),
        }
    }

    fn manager(clock: Arc<ManualClock>, max: usize, queue: usize) -> ConcurrencyManager {
        ConcurrencyManager::new(
            test_support::patient_store(),
            clock,
            config(max, queue),
            EventBus::new(64),
        )
    }

    #[tokio::test]
    async fn test_grant_queue_and_release() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(ManualClock::new(0), 1, 5);

        let slot = mgr
            .acquire_slot(dir.path(), SlotRequest::new("Writer", "w-1"))
            .await
            .unwrap()
            .expect("slot granted");
        assert!(mgr
            .acquire_slot(dir.path(), SlotRequest::new("Editor", "e-1"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(mgr.get_waiting_agents(dir.path()).await.unwrap().len(), 1);
        assert_eq!(mgr.get_available_slots(dir.path()).await.unwrap(), 0);

        mgr.release_slot(dir.path(), &slot.slot_id, SlotReleaseReason::Completed)
            .await
            .unwrap();
        let second = mgr
            .acquire_slot(dir.path(), SlotRequest::new("Editor", "e-1"))
            .await
            .unwrap();
        assert!(second.is_some());
        assert!(mgr.get_waiting_agents(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_unknown_slot_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(ManualClock::new(0), 1, 5);
        let released = mgr
            .release_slot(dir.path(), "slot-0-missing", SlotReleaseReason::Released)
            .await
            .unwrap();
        assert!(released.is_none());
    }

    #[tokio::test]
    async fn test_queue_full_still_persists_reclaim() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(0);
        let mgr = manager(clock.clone(), 1, 0);

        mgr.acquire_slot(dir.path(), SlotRequest::new("Writer", "w-1"))
            .await
            .unwrap()
            .unwrap();

        // The stale slot is reclaimed, then the request is served from it.
        clock.advance_secs(31 * 60);
        assert!(mgr
            .acquire_slot(dir.path(), SlotRequest::new("Editor", "e-1"))
            .await
            .unwrap()
            .is_some());

        let err = mgr
            .acquire_slot(dir.path(), SlotRequest::new("Critic", "c-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::QueueFull { capacity: 0, .. }));

        // Queue full again after the Editor's slot also expires: the reclaim
        // must still reach disk.
        clock.advance_secs(31 * 60);
        let overrides = ConcurrencyOverrides {
            max_concurrent_agents: Some(0),
            ..Default::default()
        };
        let result = mgr
            .acquire_slot(
                dir.path(),
                SlotRequest::new("Critic", "c-1").with_overrides(overrides),
            )
            .await;
        assert!(result.is_err());
        assert!(mgr.get_active_slots(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bound_holds_under_concurrent_acquires() {
        let dir = TempDir::new().unwrap();
        let mgr = Arc::new(manager(ManualClock::new(0), 3, 20));

        let mut handles = Vec::new();
        for i in 0..10 {
            let mgr = mgr.clone();
            let project = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                mgr.acquire_slot(&project, SlotRequest::new(format!("Agent{}", i), format!("id-{}", i)))
                    .await
                    .unwrap()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                granted += 1;
            }
        }
        assert_eq!(granted, 3);

        let status = mgr.get_concurrency_status(dir.path()).await.unwrap();
        assert_eq!(status.active, 3);
        assert_eq!(status.waiting, 7);
        assert_eq!(status.available, 0);
    }

    #[tokio::test]
    async fn test_wait_for_slot_wakes_on_release() {
        let dir = TempDir::new().unwrap();
        let mgr = Arc::new(manager(ManualClock::new(0), 1, 5));
        let held = mgr
            .acquire_slot(dir.path(), SlotRequest::new("Writer", "w-1"))
            .await
            .unwrap()
            .unwrap();

        let waiter = {
            let mgr = mgr.clone();
            let project = dir.path().to_path_buf();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                mgr.wait_for_slot(
                    &project,
                    SlotRequest::new("Editor", "e-1"),
                    Duration::from_secs(60),
                    &cancel,
                )
                .await
                .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        mgr.release_slot(dir.path(), &held.slot_id, SlotReleaseReason::Completed)
            .await
            .unwrap();

        let slot = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .expect("waiter admitted");
        assert_eq!(slot.agent_role, "Editor");
    }

    #[tokio::test]
    async fn test_wait_for_slot_honours_cancellation() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(ManualClock::new(0), 1, 5);
        mgr.acquire_slot(dir.path(), SlotRequest::new("Writer", "w-1"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = mgr
            .wait_for_slot(
                dir.path(),
                SlotRequest::new("Editor", "e-1"),
                Duration::from_millis(10),
                &cancel,
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(mgr.get_waiting_agents(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_wait_does_not_hold_queue_capacity() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(ManualClock::new(0), 1, 1);
        let held = mgr
            .acquire_slot(dir.path(), SlotRequest::new("A", "a-1"))
            .await
            .unwrap()
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(mgr
            .wait_for_slot(dir.path(), SlotRequest::new("B", "b-1"), Duration::from_millis(10), &cancel)
            .await
            .unwrap()
            .is_none());

        mgr.release_slot(dir.path(), &held.slot_id, SlotReleaseReason::Completed)
            .await
            .unwrap();
        assert!(mgr
            .acquire_slot(dir.path(), SlotRequest::new("C", "c-1"))
            .await
            .unwrap()
            .is_some());

        // The slot is taken again; D may queue because B's place was given up.
        assert!(mgr
            .acquire_slot(dir.path(), SlotRequest::new("D", "d-1"))
            .await
            .unwrap()
            .is_none());
        let waiting: Vec<String> = mgr
            .get_waiting_agents(dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.agent_role)
            .collect();
        assert_eq!(waiting, vec!["D".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_all_slots() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(ManualClock::new(0), 2, 5);
        for role in ["A", "B", "C"] {
            mgr.acquire_slot(dir.path(), SlotRequest::new(role, role))
                .await
                .unwrap();
        }
        assert_eq!(mgr.clear_all_slots(dir.path()).await.unwrap(), 2);
        let status = mgr.get_concurrency_status(dir.path()).await.unwrap();
        assert_eq!(status.active, 0);
        assert_eq!(status.waiting, 0);
    }
}
