// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Per-project file layout.

use std::path::{Path, PathBuf};

pub const STATE_LOCK_FILE: &str = ".state.lock";
pub const AGENT_STATUS_FILE: &str = "agent-status.json";
pub const CONCURRENCY_STATE_FILE: &str = "concurrency-state.json";
pub const QA_QUEUE_FILE: &str = "qa-queue.json";
pub const COUNCIL_DECISIONS_FILE: &str = "council-decisions.json";
pub const COUNCIL_DECISIONS_LOCK_FILE: &str = ".council-decisions.lock";
pub const ACTIVITY_LOG_FILE: &str = "activity-log.jsonl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Guards agent status, concurrency state and the QA queue.
    pub fn state_lock(&self) -> PathBuf {
        self.root.join(STATE_LOCK_FILE)
    }

    pub fn agent_status(&self) -> PathBuf {
        self.root.join(AGENT_STATUS_FILE)
    }

    pub fn concurrency_state(&self) -> PathBuf {
        self.root.join(CONCURRENCY_STATE_FILE)
    }

    pub fn qa_queue(&self) -> PathBuf {
        self.root.join(QA_QUEUE_FILE)
    }

    pub fn council_decisions(&self) -> PathBuf {
        self.root.join(COUNCIL_DECISIONS_FILE)
    }

    pub fn council_decisions_lock(&self) -> PathBuf {
        self.root.join(COUNCIL_DECISIONS_LOCK_FILE)
    }

    pub fn activity_log(&self) -> PathBuf {
        self.root.join(ACTIVITY_LOG_FILE)
    }
}
