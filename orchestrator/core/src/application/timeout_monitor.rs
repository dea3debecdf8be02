// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Timeout Monitor
//!
//! Tracks wall-clock budgets on two tracks per agent: the overall agent
//! timer and the timer of the agent's current stage. Timers live in an
//! in-process [`TimerRegistry`], but their start anchors are persisted in
//! `agent-status.json` first; the registry can always be rebuilt with
//! [`TimeoutMonitor::initialize_monitor`] after a restart and keeps the
//! original deadlines.
//!
//! Findings are reported, never raised: warnings and timeouts come back as
//! [`TimeoutReport`]s, are logged as issues on the status board and are
//! published on the event bus. Deciding what to do about a timed-out agent
//! is left to the caller.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Liveness detection for long-running agents
//! - **Related:** `cleanup` (consumes timeouts), `council` (registers agents)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::agent_status::{AgentStatusDocument, TimeoutState};
use crate::domain::clock::{Clock, EpochMillis};
use crate::domain::config::TimeoutConfig;
use crate::domain::error::CoordinationResult;
use crate::domain::events::CoordinationEvent;
use crate::domain::phase::WorkflowPhase;
use crate::domain::timeout::{
    ActiveStage, AgentTimer, MonitorStats, StageTimer, TimeoutEventKind, TimeoutReport, TimerCheck,
    TimerKey, TimerRegistry,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::json_store::DocumentStore;
use crate::infrastructure::project::ProjectLayout;
use crate::infrastructure::status_board::StatusBoard;

/// What [`TimeoutMonitor::initialize_monitor`] rebuilt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub restored_agents: Vec<String>,
    pub restored_stages: Vec<String>,
    /// Agents whose deadline passed while nobody was watching.
    pub timed_out_during_crash: Vec<TimeoutReport>,
    /// Restored timers already past the warning ratio. They count as warned,
    /// so later scans will not report them as approaching again.
    #[serde(default)]
    pub approaching: Vec<TimeoutReport>,
}

fn millis(duration: Duration) -> i64 {
    duration.as_millis() as i64
}

pub struct TimeoutMonitor {
    store: DocumentStore,
    clock: Arc<dyn Clock>,
    config: TimeoutConfig,
    registry: Mutex<TimerRegistry>,
    status_board: Arc<dyn StatusBoard>,
    event_bus: EventBus,
}

impl TimeoutMonitor {
    pub fn new(
        store: DocumentStore,
        clock: Arc<dyn Clock>,
        config: TimeoutConfig,
        status_board: Arc<dyn StatusBoard>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            registry: Mutex::new(TimerRegistry::new()),
            status_board,
            event_bus,
        }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Starts (or restarts) the agent-level timer and persists its anchor.
    pub async fn start_agent_timer(
        &self,
        project: &Path,
        agent_role: &str,
        agent_id: &str,
    ) -> CoordinationResult<()> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();
        let timeout_ms = millis(self.config.agent_timeout);

        let restart_count = self
            .store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    let record = doc.agent_mut(agent_role);
                    record.agent_id = Some(agent_id.to_string());
                    record.agent_start_time = Some(now);
                    let timeout_state = record.timeout_state.get_or_insert_with(TimeoutState::default);
                    timeout_state.agent_timeout = Some(timeout_ms);
                    timeout_state.agent_timed_out_at = None;
                    Ok(record.restart_count)
                },
            )
            .await?;

        self.registry.lock().insert_agent(
            TimerKey::new(project, agent_role),
            AgentTimer {
                agent_id: agent_id.to_string(),
                agent_role: agent_role.to_string(),
                start_time: now,
                timeout_ms,
                restart_count,
                warned: false,
            },
        );
        info!(agent_role, agent_id, timeout_ms, "Started agent timer");
        Ok(())
    }

    /// Stops the agent-level timer. Returns the elapsed time if one was running.
    pub fn end_agent_timer(&self, project: &Path, agent_role: &str) -> Option<i64> {
        let timer = self
            .registry
            .lock()
            .remove_agent(&TimerKey::new(project, agent_role))?;
        let elapsed = timer.elapsed(self.clock.now_millis());
        debug!(agent_role, elapsed_ms = elapsed, "Ended agent timer");
        Some(elapsed)
    }

    /// Starts the timer for `stage`, replacing any previous stage timer.
    pub async fn start_stage_timer(
        &self,
        project: &Path,
        agent_role: &str,
        stage: WorkflowPhase,
    ) -> CoordinationResult<()> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();
        let timeout_ms = millis(self.config.stage_timeout(stage));

        let agent_id = self
            .store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    let record = doc.agent_mut(agent_role);
                    let timeout_state = record.timeout_state.get_or_insert_with(TimeoutState::default);
                    timeout_state.stage = Some(stage);
                    timeout_state.stage_start_time = Some(now);
                    timeout_state.stage_timeout = Some(timeout_ms);
                    Ok(record.agent_id.clone())
                },
            )
            .await?;

        self.registry.lock().insert_stage(
            TimerKey::new(project, agent_role),
            StageTimer {
                stage,
                start_time: now,
                timeout_ms,
                warned: false,
                agent_id,
            },
        );
        info!(agent_role, %stage, timeout_ms, "Started stage timer");
        Ok(())
    }

    /// Stops the stage timer and clears its persisted anchor. Returns the
    /// elapsed time if one was running.
    pub async fn end_stage_timer(&self, project: &Path, agent_role: &str) -> CoordinationResult<Option<i64>> {
        let layout = ProjectLayout::new(project);
        let removed = self
            .registry
            .lock()
            .remove_stage(&TimerKey::new(project, agent_role));

        self.store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    if let Some(timeout_state) = doc
                        .agents
                        .get_mut(agent_role)
                        .and_then(|record| record.timeout_state.as_mut())
                    {
                        timeout_state.clear_stage();
                    }
                    Ok(())
                },
            )
            .await?;

        Ok(removed.map(|timer| {
            let elapsed = timer.elapsed(self.clock.now_millis());
            debug!(agent_role, stage = %timer.stage, elapsed_ms = elapsed, "Ended stage timer");
            elapsed
        }))
    }

    /// Starts the agent timer and the timer for its first stage.
    pub async fn register_agent(
        &self,
        project: &Path,
        agent_role: &str,
        agent_id: &str,
        stage: WorkflowPhase,
    ) -> CoordinationResult<()> {
        self.start_agent_timer(project, agent_role, agent_id).await?;
        self.start_stage_timer(project, agent_role, stage).await
    }

    /// Ends the current stage timer, then starts one for `stage`.
    pub async fn update_agent_stage(
        &self,
        project: &Path,
        agent_role: &str,
        stage: WorkflowPhase,
    ) -> CoordinationResult<()> {
        self.end_stage_timer(project, agent_role).await?;
        self.start_stage_timer(project, agent_role, stage).await
    }

    /// Drops both timers for the agent.
    pub async fn unregister_agent(&self, project: &Path, agent_role: &str) -> CoordinationResult<()> {
        self.end_stage_timer(project, agent_role).await?;
        self.end_agent_timer(project, agent_role);
        Ok(())
    }

    /// Records a restart performed by whoever supervises the agent.
    pub async fn sync_restart_count(
        &self,
        project: &Path,
        agent_role: &str,
        restart_count: u32,
    ) -> CoordinationResult<()> {
        let layout = ProjectLayout::new(project);
        self.store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    doc.agent_mut(agent_role).restart_count = restart_count;
                    Ok(())
                },
            )
            .await?;

        if let Some(timer) = self
            .registry
            .lock()
            .agents_mut_in(project)
            .find(|(key, _)| key.agent_role == agent_role)
            .map(|(_, timer)| timer)
        {
            timer.restart_count = restart_count;
        }
        Ok(())
    }

    /// Scans the project's stage timers.
    ///
    /// Each timer yields at most one warning; a timed-out stage timer is
    /// removed so it reports exactly once.
    pub async fn check_timeouts(&self, project: &Path) -> CoordinationResult<Vec<TimeoutReport>> {
        let now = self.clock.now_millis();
        let ratio = self.config.warning_ratio;

        let reports: Vec<TimeoutReport> = {
            let mut registry = self.registry.lock();
            let mut reports = Vec::new();
            let mut expired = Vec::new();
            for (key, timer) in registry.stages_mut_in(project) {
                let kind = match timer.check(now, ratio) {
                    TimerCheck::Ok => continue,
                    TimerCheck::Warning => TimeoutEventKind::ApproachingTimeout,
                    TimerCheck::TimedOut => {
                        expired.push(key.clone());
                        TimeoutEventKind::StageTimedOut
                    }
                };
                reports.push(TimeoutReport {
                    agent_role: key.agent_role.clone(),
                    agent_id: timer.agent_id.clone(),
                    kind,
                    stage: Some(timer.stage),
                    elapsed_ms: timer.elapsed(now),
                    timeout_ms: timer.timeout_ms,
                    restart_count: 0,
                });
            }
            for key in &expired {
                registry.remove_stage(key);
            }
            reports
        };

        self.handle_reports(project, &reports, now).await;
        Ok(reports)
    }

    /// Scans the project's agent-level timers.
    pub async fn check_agent_timeouts(&self, project: &Path) -> CoordinationResult<Vec<TimeoutReport>> {
        let now = self.clock.now_millis();
        let ratio = self.config.warning_ratio;

        let reports: Vec<TimeoutReport> = {
            let mut registry = self.registry.lock();
            let mut reports = Vec::new();
            let mut expired = Vec::new();
            for (key, timer) in registry.agents_mut_in(project) {
                let kind = match timer.check(now, ratio) {
                    TimerCheck::Ok => continue,
                    TimerCheck::Warning => TimeoutEventKind::ApproachingTimeout,
                    TimerCheck::TimedOut => {
                        expired.push(key.clone());
                        TimeoutEventKind::AgentTimedOut
                    }
                };
                reports.push(TimeoutReport {
                    agent_role: key.agent_role.clone(),
                    agent_id: Some(timer.agent_id.clone()),
                    kind,
                    stage: None,
                    elapsed_ms: timer.elapsed(now),
                    timeout_ms: timer.timeout_ms,
                    restart_count: timer.restart_count,
                });
            }
            for key in &expired {
                registry.remove_agent(key);
            }
            reports
        };

        self.handle_reports(project, &reports, now).await;
        Ok(reports)
    }

    /// Both scans, stage track first.
    pub async fn check_all(&self, project: &Path) -> CoordinationResult<Vec<TimeoutReport>> {
        let mut reports = self.check_timeouts(project).await?;
        reports.extend(self.check_agent_timeouts(project).await?);
        Ok(reports)
    }

    /// Logs, records and publishes findings. Failures here are logged only.
    async fn handle_reports(&self, project: &Path, reports: &[TimeoutReport], now: EpochMillis) {
        let timed_out: Vec<&TimeoutReport> = reports
            .iter()
            .filter(|r| r.kind != TimeoutEventKind::ApproachingTimeout)
            .collect();

        for report in reports {
            match report.kind {
                TimeoutEventKind::ApproachingTimeout => warn!(
                    agent_role = %report.agent_role,
                    stage = ?report.stage,
                    elapsed_ms = report.elapsed_ms,
                    timeout_ms = report.timeout_ms,
                    "Agent approaching timeout"
                ),
                _ => error!(
                    agent_role = %report.agent_role,
                    kind = %report.kind,
                    stage = ?report.stage,
                    elapsed_ms = report.elapsed_ms,
                    timeout_ms = report.timeout_ms,
                    restart_count = report.restart_count,
                    "Agent timed out"
                ),
            }
            self.event_bus.publish(CoordinationEvent::Timeout {
                project: project.to_path_buf(),
                report: report.clone(),
                at: now,
            });
        }

        if timed_out.is_empty() {
            return;
        }
        metrics::counter!("council_timeouts_total").increment(timed_out.len() as u64);

        if let Err(e) = self.record_timeouts(project, &timed_out, now).await {
            warn!(error = %e, "Failed to persist timeout events");
        }

        let issues = timed_out.iter().map(|report| {
            let message = describe_timeout(report);
            async move {
                if let Err(e) = self
                    .status_board
                    .log_issue(project, &message, "timeout-monitor")
                    .await
                {
                    warn!(error = %e, agent_role = %report.agent_role, "Failed to log timeout issue");
                }
            }
        });
        futures::future::join_all(issues).await;
    }

    async fn record_timeouts(
        &self,
        project: &Path,
        reports: &[&TimeoutReport],
        now: EpochMillis,
    ) -> CoordinationResult<()> {
        let layout = ProjectLayout::new(project);
        self.store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    for report in reports {
                        let record = doc.agent_mut(&report.agent_role);
                        record.timeout_events.push(report.to_record(now));
                        if report.kind != TimeoutEventKind::StageTimedOut {
                            record
                                .timeout_state
                                .get_or_insert_with(TimeoutState::default)
                                .agent_timed_out_at = Some(now);
                        }
                    }
                    Ok(())
                },
            )
            .await
    }

    /// Rebuilds timers for the project from `agent-status.json`.
    ///
    /// Agents that were `RUNNING` or `PENDING_VERIFICATION` get their timers
    /// back with the persisted start time, so deadlines do not move. An agent
    /// whose deadline already passed is reported as timed out during the
    /// crash instead, once: the detection is persisted and not repeated on
    /// the next initialization.
    pub async fn initialize_monitor(&self, project: &Path) -> CoordinationResult<RecoveryReport> {
        let doc: AgentStatusDocument = self
            .store
            .read(&ProjectLayout::new(project).agent_status())
            .await?;
        let now = self.clock.now_millis();
        let ratio = self.config.warning_ratio;
        let default_agent_timeout = millis(self.config.agent_timeout);

        let mut report = RecoveryReport::default();
        {
            let mut registry = self.registry.lock();
            registry.clear_project(project);

            for (role, record) in &doc.agents {
                if !record.status.is_some_and(|s| s.is_monitored()) {
                    continue;
                }
                let Some(start_time) = record.agent_start_time else {
                    continue;
                };
                let timeout_state = record.timeout_state.clone().unwrap_or_default();
                if timeout_state.agent_timed_out_at.is_some() {
                    continue;
                }

                let timeout_ms = timeout_state.agent_timeout.unwrap_or(default_agent_timeout);
                let elapsed = now - start_time;
                let agent_id = record.agent_id.clone().unwrap_or_else(|| role.clone());

                if elapsed > timeout_ms {
                    report.timed_out_during_crash.push(TimeoutReport {
                        agent_role: role.clone(),
                        agent_id: Some(agent_id),
                        kind: TimeoutEventKind::DetectedAfterCrash,
                        stage: timeout_state.stage,
                        elapsed_ms: elapsed,
                        timeout_ms,
                        restart_count: record.restart_count,
                    });
                    continue;
                }

                let key = TimerKey::new(project, role.clone());
                let agent_timer = AgentTimer::restored(
                    agent_id.clone(),
                    role.clone(),
                    start_time,
                    timeout_ms,
                    record.restart_count,
                    now,
                    ratio,
                );
                if agent_timer.warned {
                    report.approaching.push(TimeoutReport {
                        agent_role: role.clone(),
                        agent_id: Some(agent_id.clone()),
                        kind: TimeoutEventKind::ApproachingTimeout,
                        stage: None,
                        elapsed_ms: elapsed,
                        timeout_ms,
                        restart_count: record.restart_count,
                    });
                }
                registry.insert_agent(key.clone(), agent_timer);
                report.restored_agents.push(role.clone());

                if let (Some(stage), Some(stage_start)) =
                    (timeout_state.stage, timeout_state.stage_start_time)
                {
                    let stage_timeout = timeout_state
                        .stage_timeout
                        .unwrap_or_else(|| millis(self.config.stage_timeout(stage)));
                    if now - stage_start <= stage_timeout {
                        let stage_timer = StageTimer::restored(
                            stage,
                            stage_start,
                            stage_timeout,
                            Some(agent_id.clone()),
                            now,
                            ratio,
                        );
                        if stage_timer.warned {
                            report.approaching.push(TimeoutReport {
                                agent_role: role.clone(),
                                agent_id: Some(agent_id),
                                kind: TimeoutEventKind::ApproachingTimeout,
                                stage: Some(stage),
                                elapsed_ms: now - stage_start,
                                timeout_ms: stage_timeout,
                                restart_count: 0,
                            });
                        }
                        registry.insert_stage(key, stage_timer);
                        report.restored_stages.push(role.clone());
                    }
                }
            }
        }

        for finding in &report.approaching {
            warn!(
                agent_role = %finding.agent_role,
                stage = ?finding.stage,
                elapsed_ms = finding.elapsed_ms,
                timeout_ms = finding.timeout_ms,
                "Restored agent is approaching timeout"
            );
            self.event_bus.publish(CoordinationEvent::Timeout {
                project: project.to_path_buf(),
                report: finding.clone(),
                at: now,
            });
        }

        if !report.timed_out_during_crash.is_empty() {
            let crashed: Vec<&TimeoutReport> = report.timed_out_during_crash.iter().collect();
            for finding in &crashed {
                error!(
                    agent_role = %finding.agent_role,
                    elapsed_ms = finding.elapsed_ms,
                    timeout_ms = finding.timeout_ms,
                    "Agent timed out while monitor was down"
                );
                self.event_bus.publish(CoordinationEvent::Timeout {
                    project: project.to_path_buf(),
                    report: (*finding).clone(),
                    at: now,
                });
            }
            self.record_timeouts(project, &crashed, now).await?;
            for finding in &crashed {
                if let Err(e) = self
                    .status_board
                    .log_issue(project, &describe_timeout(finding), "timeout-monitor")
                    .await
                {
                    warn!(error = %e, "Failed to log crash timeout issue");
                }
            }
        }

        info!(
            project = %project.display(),
            restored_agents = report.restored_agents.len(),
            restored_stages = report.restored_stages.len(),
            timed_out = report.timed_out_during_crash.len(),
            approaching = report.approaching.len(),
            "Timeout monitor initialized"
        );
        Ok(report)
    }

    pub fn get_active_stages(&self, project: &Path) -> Vec<ActiveStage> {
        let now = self.clock.now_millis();
        let mut stages: Vec<ActiveStage> = self
            .registry
            .lock()
            .stages_in(project)
            .map(|(key, timer)| ActiveStage {
                agent_role: key.agent_role.clone(),
                stage: timer.stage,
                elapsed_ms: timer.elapsed(now),
                timeout_ms: timer.timeout_ms,
                warned: timer.warned,
            })
            .collect();
        stages.sort_by(|a, b| a.agent_role.cmp(&b.agent_role));
        stages
    }

    pub fn get_monitor_stats(&self) -> MonitorStats {
        self.registry.lock().stats()
    }

    /// Periodic scan loop. Stops when `cancel` fires.
    pub async fn run(&self, project: PathBuf, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.monitor_interval);
        info!(
            project = %project.display(),
            interval_secs = self.config.monitor_interval.as_secs(),
            "Timeout monitor started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Timeout monitor shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.check_all(&project).await {
                        Ok(reports) if !reports.is_empty() => {
                            info!(findings = reports.len(), "Timeout scan complete");
                        }
                        Ok(_) => debug!("Timeout scan found nothing"),
                        Err(e) => error!(error = %e, "Timeout scan failed"),
                    }
                }
            }
        }
    }

    /// Spawns [`run`](Self::run) on the runtime.
    pub fn start(self: Arc<Self>, project: PathBuf, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(project, cancel).await })
    }
}

fn describe_timeout(report: &TimeoutReport) -> String {
    match (report.kind, report.stage) {
        (TimeoutEventKind::StageTimedOut, Some(stage)) => format!(
            "{} timed out in stage {} after {} min (budget {} min)",
            report.agent_role,
            stage,
            report.elapsed_minutes(),
            report.timeout_ms / 60_000
        ),
        (TimeoutEventKind::DetectedAfterCrash, _) => format!(
            "{} exceeded its {} min budget while the monitor was down ({} min elapsed)",
            report.agent_role,
            report.timeout_ms / 60_000,
            report.elapsed_minutes()
        ),
        _ => format!(
            "{} exceeded its overall {} min budget ({} min elapsed, restarts: {})",
            report.agent_role,
            report.timeout_ms / 60_000,
            report.elapsed_minutes(),
            report.restart_count
        ),
    }
}
