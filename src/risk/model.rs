//! Risk finding types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Risk category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Contractual,
    Regulatory,
    Litigation,
    #[serde(rename = "IP")]
    Ip,
    Operational,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Self::Contractual,
        Self::Regulatory,
        Self::Litigation,
        Self::Ip,
        Self::Operational,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contractual => "Contractual",
            Self::Regulatory => "Regulatory",
            Self::Litigation => "Litigation",
            Self::Ip => "IP",
            Self::Operational => "Operational",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown risk category: {s}"))
    }
}

/// Risk severity. `Critical > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    /// Higher is more severe.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }

    pub fn max(self, other: Self) -> Self {
        if other.rank() > self.rank() { other } else { self }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown severity: {s}"))
    }
}

/// Likelihood that a risk materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Likelihood {
    #[serde(rename = "Very Likely")]
    VeryLikely,
    Likely,
    Possible,
    Unlikely,
}

impl Likelihood {
    /// Higher is more likely.
    pub fn rank(&self) -> u8 {
        match self {
            Self::VeryLikely => 3,
            Self::Likely => 2,
            Self::Possible => 1,
            Self::Unlikely => 0,
        }
    }

    /// The more conservative (more likely) of the two.
    pub fn most_likely(self, other: Self) -> Self {
        if other.rank() > self.rank() { other } else { self }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryLikely => "Very Likely",
            Self::Likely => "Likely",
            Self::Possible => "Possible",
            Self::Unlikely => "Unlikely",
        }
    }
}

impl fmt::Display for Likelihood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A citation tying a finding to a document page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evidence {
    pub doc_id: String,
    pub page_num: u32,
    pub citation: String,
}

impl Evidence {
    /// The `(doc_id, page_num)` pair used for duplicate detection.
    pub fn location(&self) -> (&str, u32) {
        (&self.doc_id, self.page_num)
    }
}

/// A finding as reported by one task, before integration.
///
/// `local_id` is whatever the reasoning collaborator called it; the
/// integration engine discards it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    pub severity: Severity,
    pub likelihood: Likelihood,
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub legal_basis: String,
    #[serde(default)]
    pub mitigation: String,
}

/// Integration-assigned risk identifier, rendered `RISK-0001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RiskId(pub u32);

impl fmt::Display for RiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RISK-{:04}", self.0)
    }
}

impl From<RiskId> for String {
    fn from(id: RiskId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for RiskId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .strip_prefix("RISK-")
            .and_then(|n| n.parse().ok())
            .map(RiskId)
            .ok_or_else(|| format!("invalid risk id: {value}"))
    }
}

/// A canonical, integrated risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFinding {
    pub risk_id: RiskId,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub severity: Severity,
    pub likelihood: Likelihood,
    pub evidence: Vec<Evidence>,
    pub legal_basis: String,
    pub mitigation: String,
    /// Ids of duplicates folded into this finding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<RiskId>,
}

impl RiskFinding {
    pub fn cites_document(&self, doc_id: &str) -> bool {
        self.evidence.iter().any(|e| e.doc_id == doc_id)
    }
}

/// Immutable output of integration for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskRegister {
    pub risks: Vec<RiskFinding>,
    pub limitations: Vec<String>,
}

impl RiskRegister {
    /// Risks matching the optional category and severity filters.
    pub fn filter(&self, category: Option<Category>, severity: Option<Severity>) -> Vec<RiskFinding> {
        self.risks
            .iter()
            .filter(|r| category.is_none_or(|c| r.category == c))
            .filter(|r| severity.is_none_or(|s| r.severity == s))
            .cloned()
            .collect()
    }

    /// Count per severity, every level present.
    pub fn by_severity(&self) -> BTreeMap<&'static str, usize> {
        let mut counts: BTreeMap<&'static str, usize> =
            Severity::ALL.iter().map(|s| (s.as_str(), 0)).collect();
        for risk in &self.risks {
            *counts.entry(risk.severity.as_str()).or_default() += 1;
        }
        counts
    }

    /// Count per category, every category present.
    pub fn by_category(&self) -> BTreeMap<&'static str, usize> {
        let mut counts: BTreeMap<&'static str, usize> =
            Category::ALL.iter().map(|c| (c.as_str(), 0)).collect();
        for risk in &self.risks {
            *counts.entry(risk.category.as_str()).or_default() += 1;
        }
        counts
    }

    pub fn is_empty(&self) -> bool {
        self.risks.is_empty()
    }
}
