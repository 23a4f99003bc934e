//! Progress data model: domains, assessments, fragments and stats.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::aggregate::overall_status;
use crate::error::{ProgressError, ProgressResult};

/// Status of one domain, and of an assessment as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one assessment domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainProgress {
    /// Domain identifier, unique within an assessment.
    pub domain_id: String,

    #[serde(default)]
    pub status: DomainStatus,

    /// 0-100.
    #[serde(default, deserialize_with = "deserialize_percent")]
    pub percent_complete: u8,

    /// Sequence of the last applied fragment (0 when none was applied).
    #[serde(default)]
    pub sequence: u64,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DomainProgress {
    pub fn not_started(domain_id: impl Into<String>) -> Self {
        Self {
            domain_id: domain_id.into(),
            status: DomainStatus::NotStarted,
            percent_complete: 0,
            sequence: 0,
            updated_at: None,
        }
    }

    /// Force `percent_complete` to agree with `status`.
    pub fn normalized(mut self) -> Self {
        self.percent_complete = normalize_percent(self.status, self.percent_complete);
        self
    }
}

/// Any JSON number, clamped into 0-100.
fn deserialize_percent<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    Ok(value.clamp(0.0, 100.0) as u8)
}

fn normalize_percent(status: DomainStatus, percent: u8) -> u8 {
    match status {
        DomainStatus::NotStarted => 0,
        DomainStatus::Completed => 100,
        DomainStatus::InProgress | DomainStatus::Blocked => percent.min(100),
    }
}

/// Aggregated progress of one assessment.
///
/// Domains are keyed and ordered by domain id. The overall status and the
/// last-updated timestamp are always derived from the domain set, so the
/// only way to change a value is through [`crate::aggregate::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentProgress {
    assessment_id: String,
    domains: BTreeMap<String, DomainProgress>,
    status: DomainStatus,
    updated_at: Option<DateTime<Utc>>,
}

impl AssessmentProgress {
    /// Create progress for a fresh assessment: every domain `not_started`.
    pub fn new<I, S>(assessment_id: impl Into<String>, domain_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let domains = domain_ids
            .into_iter()
            .map(|id| {
                let domain = DomainProgress::not_started(id);
                (domain.domain_id.clone(), domain)
            })
            .collect();
        Self::derive(assessment_id.into(), domains)
    }

    /// Build progress from a full domain list (e.g. a snapshot).
    ///
    /// Fails on duplicate domain ids.
    pub fn from_domains(
        assessment_id: impl Into<String>,
        domains: impl IntoIterator<Item = DomainProgress>,
    ) -> ProgressResult<Self> {
        let assessment_id = assessment_id.into();
        let mut map = BTreeMap::new();
        for domain in domains {
            let domain = domain.normalized();
            if map.contains_key(&domain.domain_id) {
                return Err(ProgressError::InvalidResponse {
                    message: format!(
                        "duplicate domain {} in assessment {}",
                        domain.domain_id, assessment_id
                    ),
                });
            }
            map.insert(domain.domain_id.clone(), domain);
        }
        Ok(Self::derive(assessment_id, map))
    }

    fn derive(assessment_id: String, domains: BTreeMap<String, DomainProgress>) -> Self {
        let mut progress = Self {
            assessment_id,
            domains,
            status: DomainStatus::NotStarted,
            updated_at: None,
        };
        progress.recompute();
        progress
    }

    fn recompute(&mut self) {
        self.status = overall_status(self.domains.values().map(|d| d.status));
        self.updated_at = self.domains.values().filter_map(|d| d.updated_at).max();
    }

    /// Replace one domain entry and re-derive the overall view.
    pub(crate) fn replace_domain(&mut self, domain: DomainProgress) {
        self.domains.insert(domain.domain_id.clone(), domain);
        self.recompute();
    }

    pub fn assessment_id(&self) -> &str {
        &self.assessment_id
    }

    pub fn domains(&self) -> &BTreeMap<String, DomainProgress> {
        &self.domains
    }

    pub fn domain(&self, domain_id: &str) -> Option<&DomainProgress> {
        self.domains.get(domain_id)
    }

    pub fn status(&self) -> DomainStatus {
        self.status
    }

    /// Latest domain timestamp.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_complete(&self) -> bool {
        self.status == DomainStatus::Completed
    }

    pub fn total_domains(&self) -> usize {
        self.domains.len()
    }

    /// Number of domains currently in `status`.
    pub fn count(&self, status: DomainStatus) -> usize {
        self.domains.values().filter(|d| d.status == status).count()
    }
}

/// A single incoming fragment describing one domain's change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub assessment_id: String,
    pub domain_id: String,
    pub status: DomainStatus,
    #[serde(default, deserialize_with = "deserialize_percent")]
    pub percent_complete: u8,
    /// Monotonically increasing per domain.
    pub sequence: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressUpdate {
    pub fn new(
        assessment_id: impl Into<String>,
        domain_id: impl Into<String>,
        status: DomainStatus,
        percent_complete: u8,
        sequence: u64,
    ) -> Self {
        Self {
            assessment_id: assessment_id.into(),
            domain_id: domain_id.into(),
            status,
            percent_complete,
            sequence,
            updated_at: None,
        }
    }

    /// Set the source timestamp.
    pub fn at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Fragment restating a domain's stored progress.
    pub fn from_domain(assessment_id: impl Into<String>, domain: &DomainProgress) -> Self {
        Self {
            assessment_id: assessment_id.into(),
            domain_id: domain.domain_id.clone(),
            status: domain.status,
            percent_complete: domain.percent_complete,
            sequence: domain.sequence,
            updated_at: domain.updated_at,
        }
    }

    pub(crate) fn to_domain(&self) -> DomainProgress {
        DomainProgress {
            domain_id: self.domain_id.clone(),
            status: self.status,
            percent_complete: self.percent_complete,
            sequence: self.sequence,
            updated_at: self.updated_at,
        }
        .normalized()
    }
}

/// Read-only summary derived from an [`AssessmentProgress`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStats {
    /// Completed domains as a percentage of all domains, rounded down.
    pub percent_complete: u8,
    pub completed_domains: usize,
    pub total_domains: usize,
    pub domains_remaining: usize,
    pub blocked_domains: usize,
    /// `None` unless an estimator is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<Duration>,
}
