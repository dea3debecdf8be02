// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cleanup;
pub mod concurrency_service;
pub mod context;
pub mod council;
pub mod phase_service;
pub mod qa_queue;
pub mod timeout_monitor;

// Re-export services for convenience
pub use cleanup::{CleanupReport, CleanupRequest, CleanupStep, ResourceLifecycleManager, StepOutcome};
pub use concurrency_service::{ConcurrencyManager, SlotRequest};
pub use context::CouncilContext;
pub use council::{AgentApprovalStatus, CouncilOutcome, CouncilService};
pub use phase_service::PhaseStateService;
pub use qa_queue::{NewSubmission, QaQueueService};
pub use timeout_monitor::{RecoveryReport, TimeoutMonitor};

#[cfg(test)]
pub(crate) mod test_support {
    use std::ops::Deref;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use serde::de::DeserializeOwned;
    use tempfile::TempDir;

    use super::CouncilContext;
    use crate::domain::clock::ManualClock;
    use crate::domain::config::{CouncilConfig, LockConfig};
    use crate::infrastructure::json_store::DocumentStore;
    use crate::infrastructure::lock::FileLock;

    /// Lock settings that tolerate heavy in-test contention.
    pub fn patient_lock() -> LockConfig {
        LockConfig {
            retries: 500,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn patient_store() -> DocumentStore {
        DocumentStore::new(FileLock::new(patient_lock()))
    }

    pub struct TestContext {
        dir: TempDir,
        pub clock: Arc<ManualClock>,
        inner: CouncilContext,
    }

    impl TestContext {
        pub fn new() -> Self {
            let clock = ManualClock::new(1_700_000_000_000);
            let config = CouncilConfig {
                lock: patient_lock(),
                ..Default::default()
            };
            Self {
                dir: TempDir::new().unwrap(),
                inner: CouncilContext::with_clock(config, clock.clone()),
                clock,
            }
        }

        pub fn project(&self) -> &Path {
            self.dir.path()
        }

        pub async fn read<T: DeserializeOwned + Default>(&self, path: &Path) -> T {
            self.inner.store.read(path).await.unwrap()
        }
    }

    impl Deref for TestContext {
        type Target = CouncilContext;

        fn deref(&self) -> &CouncilContext {
            &self.inner
        }
    }
}
