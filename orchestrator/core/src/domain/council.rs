// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Council decision audit trail (`council-decisions.json`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::approval::PowerDomain;
use crate::domain::clock::EpochMillis;

pub const AGENT_PLAN_APPROVAL: &str = "agent_plan_approval";
pub const AGENT_PLAN_REJECTION: &str = "agent_plan_rejection";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approved,
    Rejected,
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainVote {
    Approve,
    Object,
    Abstain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub domain: PowerDomain,
    pub vote: DomainVote,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A decision before the recorder assigns `id` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCouncilDecision {
    #[serde(rename = "type")]
    pub decision_type: String,
    pub primary_domain: PowerDomain,
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_check_id: Option<String>,
    pub participants: Vec<Participant>,
    pub outcome: DecisionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouncilDecision {
    pub id: String,
    #[serde(flatten)]
    pub body: NewCouncilDecision,
    pub timestamp: EpochMillis,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionStats {
    pub total: usize,
    pub by_domain: BTreeMap<PowerDomain, usize>,
    pub by_outcome: BTreeMap<DecisionOutcome, usize>,
}

pub fn decisions_by_domain(decisions: &[CouncilDecision], domain: PowerDomain) -> Vec<CouncilDecision> {
    decisions
        .iter()
        .filter(|d| d.body.primary_domain == domain)
        .cloned()
        .collect()
}

pub fn decisions_by_type(decisions: &[CouncilDecision], decision_type: &str) -> Vec<CouncilDecision> {
    decisions
        .iter()
        .filter(|d| d.body.decision_type == decision_type)
        .cloned()
        .collect()
}

pub fn latest_decision(decisions: &[CouncilDecision], decision_type: &str) -> Option<CouncilDecision> {
    decisions
        .iter()
        .filter(|d| d.body.decision_type == decision_type)
        .max_by_key(|d| d.timestamp)
        .cloned()
}

pub fn decision_stats(decisions: &[CouncilDecision]) -> DecisionStats {
    let mut stats = DecisionStats {
        total: decisions.len(),
        ..Default::default()
    };
    for domain in PowerDomain::ALL {
        stats.by_domain.insert(domain, 0);
    }
    for decision in decisions {
        *stats.by_domain.entry(decision.body.primary_domain).or_default() += 1;
        *stats.by_outcome.entry(decision.body.outcome).or_default() += 1;
    }
    stats
}
