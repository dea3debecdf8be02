// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Service wiring
//!
//! Builds every coordination service from one [`CouncilConfig`] so they
//! share a lock configuration, a clock and an event bus.

use std::sync::Arc;

use crate::application::cleanup::ResourceLifecycleManager;
use crate::application::concurrency_service::ConcurrencyManager;
use crate::application::council::CouncilService;
use crate::application::phase_service::PhaseStateService;
use crate::application::qa_queue::QaQueueService;
use crate::application::timeout_monitor::TimeoutMonitor;
use crate::domain::clock::{system_clock, Clock};
use crate::domain::config::CouncilConfig;
use crate::infrastructure::decision_log::FileDecisionLog;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::json_store::DocumentStore;
use crate::infrastructure::lock::FileLock;
use crate::infrastructure::status_board::FileStatusBoard;

pub struct CouncilContext {
    pub config: CouncilConfig,
    pub clock: Arc<dyn Clock>,
    pub store: DocumentStore,
    pub event_bus: EventBus,
    pub status_board: Arc<FileStatusBoard>,
    pub decisions: Arc<FileDecisionLog>,
    pub phases: Arc<PhaseStateService>,
    pub concurrency: Arc<ConcurrencyManager>,
    pub qa: Arc<QaQueueService>,
    pub monitor: Arc<TimeoutMonitor>,
    pub lifecycle: Arc<ResourceLifecycleManager>,
    pub council: Arc<CouncilService>,
}

impl CouncilContext {
    pub fn new(config: CouncilConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: CouncilConfig, clock: Arc<dyn Clock>) -> Self {
        let store = DocumentStore::new(FileLock::new(config.lock.clone()));
        let event_bus = EventBus::with_default_capacity();

        let status_board = Arc::new(FileStatusBoard::new(store.clone(), clock.clone()));
        let decisions = Arc::new(FileDecisionLog::new(store.clone(), clock.clone()));
        let phases = Arc::new(PhaseStateService::new(
            store.clone(),
            clock.clone(),
            config.approval.clone(),
            event_bus.clone(),
        ));
        let concurrency = Arc::new(ConcurrencyManager::new(
            store.clone(),
            clock.clone(),
            config.concurrency.clone(),
            event_bus.clone(),
        ));
        let qa = Arc::new(QaQueueService::new(
            store.clone(),
            clock.clone(),
            config.qa.clone(),
            event_bus.clone(),
        ));
        let monitor = Arc::new(TimeoutMonitor::new(
            store.clone(),
            clock.clone(),
            config.timeouts.clone(),
            status_board.clone(),
            event_bus.clone(),
        ));
        let lifecycle = Arc::new(ResourceLifecycleManager::new(
            monitor.clone(),
            concurrency.clone(),
            phases.clone(),
            status_board.clone(),
            clock.clone(),
            event_bus.clone(),
        ));
        let council = Arc::new(CouncilService::new(
            phases.clone(),
            qa.clone(),
            concurrency.clone(),
            monitor.clone(),
            status_board.clone(),
            decisions.clone(),
        ));

        Self {
            config,
            clock,
            store,
            event_bus,
            status_board,
            decisions,
            phases,
            concurrency,
            qa,
            monitor,
            lifecycle,
            council,
        }
    }
}
