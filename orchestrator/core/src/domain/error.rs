// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Errors
//!
//! Hard failures surfaced by the coordination core. Expected workflow
//! outcomes (an illegal transition, an approval outside `awaiting_approval`)
//! are *not* errors; they come back as
//! [`ValidationResult`](crate::domain::phase::ValidationResult) values.
//!
//! | Variant | Category |
//! |---------|----------|
//! | `LockContention`, `QueueFull`, `AlreadyQueued` | contention |
//! | `PhaseStateNotFound` | missing state (caller sequencing bug) |
//! | `Io`, `Serialization` | persistence |

use std::path::{Path, PathBuf};

/// Which bounded queue rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    SlotWait,
    QaSubmission,
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueKind::SlotWait => write!(f, "slot wait queue"),
            QueueKind::QaSubmission => write!(f, "QA submission queue"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("Failed to acquire lock on {} after {retries} retries", path.display())]
    LockContention { path: PathBuf, retries: u32 },

    #[error("{kind} is full ({capacity} entries)")]
    QueueFull { kind: QueueKind, capacity: usize },

    #[error("Phase state not found for agent: {0}")]
    PhaseStateNotFound(String),

    #[error("Agent {0} already has a submission in the QA queue")]
    AlreadyQueued(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoordinationError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CoordinationError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Contention errors are worth retrying later; everything else is not.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            CoordinationError::LockContention { .. } | CoordinationError::QueueFull { .. }
        )
    }
}

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        CoordinationError::Serialization(err.to_string())
    }
}

pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_contention_names_path() {
        let err = CoordinationError::LockContention {
            path: PathBuf::from("/tmp/project/.state.lock"),
            retries: 3,
        };
        assert_eq!(
            err.to_string(),
            "Failed to acquire lock on /tmp/project/.state.lock after 3 retries"
        );
        assert!(err.is_contention());
    }

    #[test]
    fn test_missing_state_is_not_contention() {
        let err = CoordinationError::PhaseStateNotFound("Video Producer".to_string());
        assert!(!err.is_contention());
        assert!(err.to_string().contains("Video Producer"));
    }
}
