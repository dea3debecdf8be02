// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure coordination types and rules: phases, approvals, slots, the QA
//! queue, timers and the documents they persist into.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements the coordination model with no I/O

pub mod agent_status;
pub mod approval;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod council;
pub mod error;
pub mod events;
pub mod phase;
pub mod qa;
pub mod timeout;

pub use agent_status::{AgentStatus, AgentStatusUpdate, CleanupReason};
pub use approval::{ApprovalState, PowerDomain};
pub use clock::{Clock, EpochMillis, ManualClock, SystemClock};
pub use error::{CoordinationError, CoordinationResult};
pub use phase::{AgentPhaseState, ValidationResult, WorkflowPhase};
