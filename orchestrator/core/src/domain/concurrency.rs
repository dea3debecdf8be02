// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Execution slot bookkeeping.
//!
//! [`ConcurrencyState`] is the whole `concurrency-state.json` document. Its
//! methods are the pure read-modify-write steps the
//! [`ConcurrencyManager`](crate::application::concurrency_service::ConcurrencyManager)
//! runs while holding the project lock.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::clock::EpochMillis;
use crate::domain::config::ConcurrencyConfig;
use crate::domain::error::{CoordinationError, QueueKind};

/// Why a slot left `activeSlots`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotReleaseReason {
    Completed,
    Failed,
    Timeout,
    Aborted,
    Cleared,
    Released,
}

impl fmt::Display for SlotReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotReleaseReason::Completed => "completed",
            SlotReleaseReason::Failed => "failed",
            SlotReleaseReason::Timeout => "timeout",
            SlotReleaseReason::Aborted => "aborted",
            SlotReleaseReason::Cleared => "cleared",
            SlotReleaseReason::Released => "released",
        };
        f.write_str(s)
    }
}

impl FromStr for SlotReleaseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completed" => Ok(SlotReleaseReason::Completed),
            "failed" => Ok(SlotReleaseReason::Failed),
            "timeout" => Ok(SlotReleaseReason::Timeout),
            "aborted" => Ok(SlotReleaseReason::Aborted),
            "cleared" => Ok(SlotReleaseReason::Cleared),
            "released" => Ok(SlotReleaseReason::Released),
            other => Err(format!("Unknown release reason '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSlot {
    pub slot_id: String,
    pub agent_role: String,
    pub agent_id: String,
    pub acquired_at: EpochMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ExecutionSlot {
    pub fn age_millis(&self, now: EpochMillis) -> i64 {
        now - self.acquired_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingAgent {
    pub agent_role: String,
    pub agent_id: String,
    pub enqueued_at: EpochMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotHistoryEntry {
    pub slot_id: String,
    pub agent_role: String,
    #[serde(default)]
    pub agent_id: String,
    pub acquired_at: EpochMillis,
    pub released_at: EpochMillis,
    pub reason: SlotReleaseReason,
}

/// `concurrency-state.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrencyState {
    #[serde(default)]
    pub active_slots: Vec<ExecutionSlot>,
    #[serde(default)]
    pub wait_queue: Vec<WaitingAgent>,
    #[serde(default)]
    pub history: Vec<SlotHistoryEntry>,
}

/// Result of an admission attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    Granted(ExecutionSlot),
    /// No slot free; the caller is (now) in the wait queue at `position` (0-based).
    Queued { position: usize },
}

/// Snapshot for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrencyStatus {
    pub max_concurrent: usize,
    pub active: usize,
    pub available: usize,
    pub waiting: usize,
    pub active_slots: Vec<ExecutionSlot>,
}

pub fn new_slot_id(now: EpochMillis) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("slot-{}-{}", now, &suffix[..9])
}

impl ConcurrencyState {
    /// Moves every slot older than `slot_timeout` to history as `timeout`.
    pub fn reclaim_expired(
        &mut self,
        now: EpochMillis,
        config: &ConcurrencyConfig,
    ) -> Vec<ExecutionSlot> {
        let timeout = config.slot_timeout.as_millis() as i64;
        let (expired, active): (Vec<_>, Vec<_>) = self
            .active_slots
            .drain(..)
            .partition(|slot| slot.age_millis(now) > timeout);
        self.active_slots = active;

        for slot in &expired {
            self.record_release(slot, now, SlotReleaseReason::Timeout);
        }
        expired
    }

    /// Grants a slot if one is free, otherwise queues the caller.
    ///
    /// A caller already waiting keeps its original queue position, and is
    /// removed from the queue once granted.
    pub fn try_acquire(
        &mut self,
        agent_role: &str,
        agent_id: &str,
        metadata: Option<serde_json::Value>,
        now: EpochMillis,
        config: &ConcurrencyConfig,
    ) -> Result<AcquireOutcome, CoordinationError> {
        if self.active_slots.len() < config.max_concurrent_agents {
            let slot = ExecutionSlot {
                slot_id: new_slot_id(now),
                agent_role: agent_role.to_string(),
                agent_id: agent_id.to_string(),
                acquired_at: now,
                metadata,
            };
            self.wait_queue
                .retain(|w| !(w.agent_id == agent_id && w.agent_role == agent_role));
            self.active_slots.push(slot.clone());
            return Ok(AcquireOutcome::Granted(slot));
        }

        if let Some(position) = self
            .wait_queue
            .iter()
            .position(|w| w.agent_id == agent_id && w.agent_role == agent_role)
        {
            return Ok(AcquireOutcome::Queued { position });
        }

        if self.wait_queue.len() >= config.max_queue_size {
            return Err(CoordinationError::QueueFull {
                kind: QueueKind::SlotWait,
                capacity: config.max_queue_size,
            });
        }

        self.wait_queue.push(WaitingAgent {
            agent_role: agent_role.to_string(),
            agent_id: agent_id.to_string(),
            enqueued_at: now,
            priority: None,
        });
        self.wait_queue.sort_by_key(|w| w.enqueued_at);
        let position = self
            .wait_queue
            .iter()
            .position(|w| w.agent_id == agent_id && w.agent_role == agent_role)
            .unwrap_or(self.wait_queue.len() - 1);
        Ok(AcquireOutcome::Queued { position })
    }

    /// Removes the slot. `None` if it was already gone.
    pub fn release(
        &mut self,
        slot_id: &str,
        reason: SlotReleaseReason,
        now: EpochMillis,
    ) -> Option<ExecutionSlot> {
        let index = self.active_slots.iter().position(|s| s.slot_id == slot_id)?;
        let slot = self.active_slots.remove(index);
        self.record_release(&slot, now, reason);
        Some(slot)
    }

    /// Drops the agent from the wait queue. `true` if it was waiting.
    pub fn remove_waiter(&mut self, agent_role: &str, agent_id: &str) -> bool {
        let before = self.wait_queue.len();
        self.wait_queue
            .retain(|w| !(w.agent_id == agent_id && w.agent_role == agent_role));
        self.wait_queue.len() != before
    }

    /// Releases every active slot as `cleared` and empties the wait queue.
    pub fn clear_all(&mut self, now: EpochMillis) -> usize {
        let slots: Vec<_> = self.active_slots.drain(..).collect();
        for slot in &slots {
            self.record_release(slot, now, SlotReleaseReason::Cleared);
        }
        self.wait_queue.clear();
        slots.len()
    }

    pub fn available(&self, config: &ConcurrencyConfig) -> usize {
        config.max_concurrent_agents.saturating_sub(self.active_slots.len())
    }

    pub fn status(&self, config: &ConcurrencyConfig) -> ConcurrencyStatus {
        ConcurrencyStatus {
            max_concurrent: config.max_concurrent_agents,
            active: self.active_slots.len(),
            available: self.available(config),
            waiting: self.wait_queue.len(),
            active_slots: self.active_slots.clone(),
        }
    }

    fn record_release(&mut self, slot: &ExecutionSlot, now: EpochMillis, reason: SlotReleaseReason) {
        self.history.push(SlotHistoryEntry {
            slot_id: slot.slot_id.clone(),
            agent_role: slot.agent_role.clone(),
            agent_id: slot.agent_id.clone(),
            acquired_at: slot.acquired_at,
            released_at: now,
            reason,
        });
    }
}
