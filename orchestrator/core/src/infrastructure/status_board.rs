// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Status Board - externally visible agent status and activity log
//!
//! The coordination services report side effects (status changes, decisions,
//! issues, cleanup summaries) through the [`StatusBoard`] trait. The file
//! implementation merges partial status into `agent-status.json` under the
//! project lock and appends activity entries to `activity-log.jsonl`.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::agent_status::{AgentStatusDocument, AgentStatusUpdate};
use crate::domain::clock::{Clock, EpochMillis};
use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::infrastructure::json_store::DocumentStore;
use crate::infrastructure::project::ProjectLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Decision,
    Issue,
    Event,
}

/// One line of `activity-log.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub who: Option<String>,
    pub at: EpochMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[async_trait]
pub trait StatusBoard: Send + Sync {
    async fn update_agent_status(
        &self,
        project: &Path,
        agent_role: &str,
        update: AgentStatusUpdate,
    ) -> CoordinationResult<()>;

    async fn log_decision(&self, project: &Path, message: &str, who: &str) -> CoordinationResult<()>;

    async fn log_issue(&self, project: &Path, message: &str, who: &str) -> CoordinationResult<()>;

    async fn log_event(&self, project: &Path, entry: ActivityEntry) -> CoordinationResult<()>;
}

pub struct FileStatusBoard {
    store: DocumentStore,
    clock: Arc<dyn Clock>,
}

impl FileStatusBoard {
    pub fn new(store: DocumentStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Lock-free read of the activity log.
    pub async fn read_activity(&self, project: &Path) -> CoordinationResult<Vec<ActivityEntry>> {
        let path = ProjectLayout::new(project).activity_log();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoordinationError::io(&path, e)),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(CoordinationError::from))
            .collect()
    }

    async fn append(&self, project: &Path, entry: &ActivityEntry) -> CoordinationResult<()> {
        let path = ProjectLayout::new(project).activity_log();
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CoordinationError::io(&path, e))?;
        file.write_all(&line)
            .await
            .map_err(|e| CoordinationError::io(&path, e))?;
        debug!(kind = ?entry.kind, "Appended activity entry");
        Ok(())
    }

    fn entry(&self, kind: ActivityKind, message: &str, who: &str) -> ActivityEntry {
        ActivityEntry {
            kind,
            message: message.to_string(),
            who: Some(who.to_string()),
            at: self.clock.now_millis(),
            details: None,
        }
    }
}

#[async_trait]
impl StatusBoard for FileStatusBoard {
    async fn update_agent_status(
        &self,
        project: &Path,
        agent_role: &str,
        update: AgentStatusUpdate,
    ) -> CoordinationResult<()> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();
        self.store
            .update(
                &layout.state_lock(),
                &layout.agent_status(),
                |doc: &mut AgentStatusDocument| {
                    update.apply_to(doc.agent_mut(agent_role), now);
                    Ok(())
                },
            )
            .await
    }

    async fn log_decision(&self, project: &Path, message: &str, who: &str) -> CoordinationResult<()> {
        let entry = self.entry(ActivityKind::Decision, message, who);
        self.append(project, &entry).await
    }

    async fn log_issue(&self, project: &Path, message: &str, who: &str) -> CoordinationResult<()> {
        let entry = self.entry(ActivityKind::Issue, message, who);
        self.append(project, &entry).await
    }

    async fn log_event(&self, project: &Path, entry: ActivityEntry) -> CoordinationResult<()> {
        self.append(project, &entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent_status::AgentStatus;
    use crate::domain::clock::ManualClock;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_update_and_log() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(1_000);
        let board = FileStatusBoard::new(DocumentStore::default(), clock.clone());

        board
            .update_agent_status(
                dir.path(),
                "Writer",
                AgentStatusUpdate::new(AgentStatus::Running, "plan_design", 30),
            )
            .await
            .unwrap();
        board.log_decision(dir.path(), "approved plan", "pm").await.unwrap();
        clock.advance_secs(1);
        board.log_issue(dir.path(), "stage overdue", "monitor").await.unwrap();

        let store = DocumentStore::default();
        let doc: AgentStatusDocument = store
            .read(&ProjectLayout::new(dir.path()).agent_status())
            .await
            .unwrap();
        let record = doc.agent("Writer").unwrap();
        assert_eq!(record.status, Some(AgentStatus::Running));
        assert_eq!(record.progress, Some(30));

        let log = board.read_activity(dir.path()).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].kind, ActivityKind::Decision);
        assert_eq!(log[1].kind, ActivityKind::Issue);
        assert_eq!(log[1].at, 2_000);
    }
}
