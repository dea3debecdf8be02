// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Council decision recorder
//!
//! Append-only audit trail of approvals and rejections in
//! `council-decisions.json`, guarded by its own `.council-decisions.lock` so
//! that recording never contends with the coordination state lock.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::domain::approval::PowerDomain;
use crate::domain::clock::Clock;
use crate::domain::council::{self, CouncilDecision, DecisionStats, NewCouncilDecision};
use crate::domain::error::CoordinationResult;
use crate::infrastructure::json_store::DocumentStore;
use crate::infrastructure::project::ProjectLayout;

#[async_trait]
pub trait DecisionRecorder: Send + Sync {
    async fn record_decision(
        &self,
        project: &Path,
        decision: NewCouncilDecision,
    ) -> CoordinationResult<CouncilDecision>;
}

pub struct FileDecisionLog {
    store: DocumentStore,
    clock: Arc<dyn Clock>,
}

impl FileDecisionLog {
    pub fn new(store: DocumentStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn history(&self, project: &Path) -> CoordinationResult<Vec<CouncilDecision>> {
        self.store
            .read(&ProjectLayout::new(project).council_decisions())
            .await
    }

    pub async fn by_domain(
        &self,
        project: &Path,
        domain: PowerDomain,
    ) -> CoordinationResult<Vec<CouncilDecision>> {
        Ok(council::decisions_by_domain(&self.history(project).await?, domain))
    }

    pub async fn by_type(
        &self,
        project: &Path,
        decision_type: &str,
    ) -> CoordinationResult<Vec<CouncilDecision>> {
        Ok(council::decisions_by_type(&self.history(project).await?, decision_type))
    }

    pub async fn latest(
        &self,
        project: &Path,
        decision_type: &str,
    ) -> CoordinationResult<Option<CouncilDecision>> {
        Ok(council::latest_decision(&self.history(project).await?, decision_type))
    }

    pub async fn stats(&self, project: &Path) -> CoordinationResult<DecisionStats> {
        Ok(council::decision_stats(&self.history(project).await?))
    }
}

#[async_trait]
impl DecisionRecorder for FileDecisionLog {
    async fn record_decision(
        &self,
        project: &Path,
        decision: NewCouncilDecision,
    ) -> CoordinationResult<CouncilDecision> {
        let layout = ProjectLayout::new(project);
        let now = self.clock.now_millis();
        let recorded = CouncilDecision {
            id: format!("cd-{}-{}", now, &Uuid::new_v4().simple().to_string()[..9]),
            body: decision,
            timestamp: now,
        };

        let entry = recorded.clone();
        self.store
            .update(
                &layout.council_decisions_lock(),
                &layout.council_decisions(),
                |decisions: &mut Vec<CouncilDecision>| {
                    decisions.push(entry);
                    Ok(())
                },
            )
            .await?;

        info!(
            decision_id = %recorded.id,
            decision_type = %recorded.body.decision_type,
            outcome = ?recorded.body.outcome,
            "Recorded council decision"
        );
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::domain::council::{DecisionOutcome, DomainVote, Participant, AGENT_PLAN_APPROVAL};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_and_query() {
        let dir = TempDir::new().unwrap();
        let log = FileDecisionLog::new(DocumentStore::default(), ManualClock::new(500));

        let recorded = log
            .record_decision(
                dir.path(),
                NewCouncilDecision {
                    decision_type: AGENT_PLAN_APPROVAL.to_string(),
                    primary_domain: PowerDomain::Planning,
                    decision: "Approve Writer plan".to_string(),
                    context: Some("Writer".to_string()),
                    cross_check_id: None,
                    participants: vec![Participant {
                        domain: PowerDomain::Planning,
                        vote: DomainVote::Approve,
                        reason: None,
                    }],
                    outcome: DecisionOutcome::Approved,
                },
            )
            .await
            .unwrap();
        assert!(recorded.id.starts_with("cd-500-"));
        assert!(!dir.path().join(".council-decisions.lock").exists());

        assert_eq!(log.history(dir.path()).await.unwrap().len(), 1);
        assert_eq!(log.by_domain(dir.path(), PowerDomain::Planning).await.unwrap().len(), 1);
        assert!(log.by_type(dir.path(), "other").await.unwrap().is_empty());
        assert_eq!(
            log.latest(dir.path(), AGENT_PLAN_APPROVAL).await.unwrap().unwrap().id,
            recorded.id
        );
        assert_eq!(log.stats(dir.path()).await.unwrap().total, 1);
    }
}
