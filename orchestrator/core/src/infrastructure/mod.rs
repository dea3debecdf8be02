// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod decision_log;
pub mod event_bus;
pub mod json_store;
pub mod lock;
pub mod project;
pub mod status_board;

pub use decision_log::{DecisionRecorder, FileDecisionLog};
pub use event_bus::{EventBus, EventBusError, EventReceiver};
pub use json_store::DocumentStore;
pub use lock::FileLock;
pub use project::ProjectLayout;
pub use status_board::{ActivityEntry, ActivityKind, FileStatusBoard, StatusBoard};
