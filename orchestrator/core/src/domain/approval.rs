// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Separation-of-powers approval state.
//!
//! Each agent's plan must be signed off by its primary power domain plus every
//! required signoff domain before the agent may enter `execution`. The
//! per-domain `approvals` map is authoritative; the flat `granted/grantedBy/
//! grantedAt` fields are a projection kept for external readers of
//! `agent-status.json` and are only ever written by [`ApprovalState`] itself.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::clock::EpochMillis;

/// Independent approval authorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerDomain {
    Planning,
    Execution,
    Quality,
}

impl PowerDomain {
    pub const ALL: [PowerDomain; 3] = [
        PowerDomain::Planning,
        PowerDomain::Execution,
        PowerDomain::Quality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerDomain::Planning => "planning",
            PowerDomain::Execution => "execution",
            PowerDomain::Quality => "quality",
        }
    }
}

impl fmt::Display for PowerDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planning" => Ok(PowerDomain::Planning),
            "execution" => Ok(PowerDomain::Execution),
            "quality" => Ok(PowerDomain::Quality),
            other => Err(format!(
                "Unknown power domain '{}'. Expected planning, execution or quality",
                other
            )),
        }
    }
}

/// One domain's signoff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainApproval {
    pub granted: bool,
    pub granted_by: Option<String>,
    pub granted_at: Option<EpochMillis>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalState {
    pub required: bool,
    pub primary_domain: PowerDomain,
    pub required_signoffs: Vec<PowerDomain>,
    pub approvals: BTreeMap<PowerDomain, DomainApproval>,

    // Projection of `approvals`; see `sync_legacy_fields`.
    #[serde(default)]
    granted: bool,
    #[serde(default)]
    granted_by: Option<String>,
    #[serde(default)]
    granted_at: Option<EpochMillis>,
}

impl Default for ApprovalState {
    fn default() -> Self {
        Self::new(PowerDomain::Planning, vec![PowerDomain::Execution])
    }
}

impl ApprovalState {
    /// Fresh state with all three domains un-granted.
    pub fn new(primary_domain: PowerDomain, required_signoffs: Vec<PowerDomain>) -> Self {
        let approvals = PowerDomain::ALL
            .iter()
            .map(|domain| (*domain, DomainApproval::default()))
            .collect();

        Self {
            required: false,
            primary_domain,
            required_signoffs,
            approvals,
            granted: false,
            granted_by: None,
            granted_at: None,
        }
    }

    /// `{primaryDomain} ∪ requiredSignoffs`
    pub fn required_domains(&self) -> BTreeSet<PowerDomain> {
        let mut domains: BTreeSet<PowerDomain> = self.required_signoffs.iter().copied().collect();
        domains.insert(self.primary_domain);
        domains
    }

    pub fn is_domain_granted(&self, domain: PowerDomain) -> bool {
        self.approvals
            .get(&domain)
            .map(|approval| approval.granted)
            .unwrap_or(false)
    }

    /// True iff every required domain has granted.
    pub fn is_fully_approved(&self) -> bool {
        self.required_domains()
            .into_iter()
            .all(|domain| self.is_domain_granted(domain))
    }

    /// Required domains that have not yet signed off.
    pub fn pending_domains(&self) -> Vec<PowerDomain> {
        self.required_domains()
            .into_iter()
            .filter(|domain| !self.is_domain_granted(*domain))
            .collect()
    }

    pub fn grant(&mut self, domain: PowerDomain, approver_id: &str, at: EpochMillis) {
        self.approvals.insert(
            domain,
            DomainApproval {
                granted: true,
                granted_by: Some(approver_id.to_string()),
                granted_at: Some(at),
            },
        );
        self.sync_legacy_fields();
    }

    /// Resets every domain to un-granted.
    pub fn revoke_all(&mut self) {
        for domain in PowerDomain::ALL {
            self.approvals.insert(domain, DomainApproval::default());
        }
        self.sync_legacy_fields();
    }

    pub fn granted(&self) -> bool {
        self.granted
    }

    pub fn granted_by(&self) -> Option<&str> {
        self.granted_by.as_deref()
    }

    pub fn granted_at(&self) -> Option<EpochMillis> {
        self.granted_at
    }

    // The legacy fields report the primary domain's approver and the moment
    // the last required signoff landed.
    fn sync_legacy_fields(&mut self) {
        if self.is_fully_approved() {
            let primary = self.approvals.get(&self.primary_domain);
            self.granted = true;
            self.granted_by = primary.and_then(|a| a.granted_by.clone());
            self.granted_at = self
                .required_domains()
                .iter()
                .filter_map(|domain| self.approvals.get(domain).and_then(|a| a.granted_at))
                .max();
        } else {
            self.granted = false;
            self.granted_by = None;
            self.granted_at = None;
        }
    }
}

/// Pure conjunction over the required domains.
pub fn is_fully_approved(approval: &ApprovalState) -> bool {
    approval.is_fully_approved()
}
