//! Integration engine: merges per-task findings into one risk register.
//!
//! `integrate` is pure: no clock, no randomness, no I/O, no hash-order
//! dependence. The same inputs always produce the same register.
//!
//! Steps:
//! 1. Number findings `RISK-0001..` by (task sequence, position in task).
//! 2. Fold duplicates into the earliest matching finding. A finding that
//!    matches several earlier clusters joins all of them. A pair is a
//!    duplicate when it shares a category and a `(doc_id, page_num)`, or when
//!    the title similarity reaches the threshold. Scores in the ambiguous band
//!    are kept apart and reported.
//! 3. Sort by severity (desc), category name, risk id.
//! 4. Collect limitations: task notes, unanalyzed batches, ambiguities.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MergeConfig;
use crate::risk::model::{RawFinding, RiskFinding, RiskId, RiskRegister};
use crate::risk::similarity::title_similarity;

/// Output of one successful task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingSet {
    /// Task submission order.
    pub sequence: usize,
    pub findings: Vec<RawFinding>,
    /// Coverage gaps the task noticed (missing pages and the like).
    pub limitations: Vec<String>,
}

/// A batch whose documents were never analyzed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnanalyzedBatch {
    pub sequence: usize,
    pub document_ids: Vec<String>,
    pub reason: String,
}

impl UnanalyzedBatch {
    /// Limitation note naming the uncovered documents.
    pub fn limitation(&self) -> String {
        format!(
            "Documents not analyzed: {} (batch {}: {})",
            self.document_ids.join(", "),
            self.sequence + 1,
            self.reason
        )
    }
}

/// A candidate duplicate pair too close to call. Kept separate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationAmbiguity {
    pub kept: RiskId,
    pub kept_title: String,
    pub other: RiskId,
    pub other_title: String,
    pub score: f64,
}

impl fmt::Display for IntegrationAmbiguity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Possible duplicate not merged: {} \"{}\" and {} \"{}\" (title similarity {:.2})",
            self.kept, self.kept_title, self.other, self.other_title, self.score
        )
    }
}

/// Register plus the ambiguities found while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct Integration {
    pub register: RiskRegister,
    pub ambiguities: Vec<IntegrationAmbiguity>,
}

/// Merge task outputs into a register.
pub fn merge(
    sets: &[FindingSet],
    unanalyzed: &[UnanalyzedBatch],
    config: &MergeConfig,
) -> RiskRegister {
    integrate(sets, unanalyzed, config).register
}

/// Merge task outputs, also returning ambiguous pairs.
pub fn integrate(
    sets: &[FindingSet],
    unanalyzed: &[UnanalyzedBatch],
    config: &MergeConfig,
) -> Integration {
    let mut ordered: Vec<&FindingSet> = sets.iter().collect();
    ordered.sort_by_key(|s| s.sequence);

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut ambiguities = Vec::new();
    let mut next_id = 1u32;

    for set in &ordered {
        for raw in &set.findings {
            let id = RiskId(next_id);
            next_id += 1;

            let mut matched = Vec::new();
            let mut close_calls = Vec::new();
            for (idx, cluster) in clusters.iter().enumerate() {
                let score = cluster.best_title_score(&raw.title);
                if cluster.shares_location(raw) || score >= config.similarity_threshold {
                    matched.push(idx);
                } else if score >= config.ambiguous_floor {
                    close_calls.push(IntegrationAmbiguity {
                        kept: cluster.finding.risk_id,
                        kept_title: cluster.finding.title.clone(),
                        other: id,
                        other_title: raw.title.clone(),
                        score,
                    });
                }
            }

            // A finding that bridges several clusters joins them all into
            // the earliest one.
            match matched.split_first() {
                Some((&keep, rest)) => {
                    let mut folded: Vec<Cluster> =
                        rest.iter().rev().map(|&idx| clusters.remove(idx)).collect();
                    folded.reverse();
                    for other in folded {
                        clusters[keep].fold(other);
                    }
                    clusters[keep].absorb(id, raw);
                }
                None => {
                    ambiguities.extend(close_calls);
                    clusters.push(Cluster::new(id, raw));
                }
            }
        }
    }

    let mut risks: Vec<RiskFinding> = clusters.into_iter().map(Cluster::into_finding).collect();
    risks.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then_with(|| a.category.as_str().cmp(b.category.as_str()))
            .then_with(|| a.risk_id.cmp(&b.risk_id))
    });

    let mut limitations = Limitations::default();
    for set in &ordered {
        for note in &set.limitations {
            limitations.push(note.clone());
        }
    }
    let mut failed: Vec<&UnanalyzedBatch> = unanalyzed.iter().collect();
    failed.sort_by_key(|b| b.sequence);
    for batch in failed {
        limitations.push(batch.limitation());
    }
    for ambiguity in &ambiguities {
        limitations.push(ambiguity.to_string());
    }

    Integration {
        register: RiskRegister {
            risks,
            limitations: limitations.into_vec(),
        },
        ambiguities,
    }
}

/// A finding being built up from one or more duplicates.
struct Cluster {
    finding: RiskFinding,
    titles: Vec<String>,
    locations: BTreeSet<(String, u32)>,
    mitigations: Vec<String>,
    legal_bases: Vec<String>,
}

impl Cluster {
    fn new(id: RiskId, raw: &RawFinding) -> Self {
        let mut cluster = Self {
            finding: RiskFinding {
                risk_id: id,
                title: raw.title.clone(),
                description: raw.description.clone(),
                category: raw.category,
                severity: raw.severity,
                likelihood: raw.likelihood,
                evidence: Vec::new(),
                legal_basis: String::new(),
                mitigation: String::new(),
                merged_from: Vec::new(),
            },
            titles: vec![raw.title.clone()],
            locations: BTreeSet::new(),
            mitigations: Vec::new(),
            legal_bases: Vec::new(),
        };
        cluster.add_details(raw);
        cluster
    }

    fn shares_location(&self, raw: &RawFinding) -> bool {
        raw.category == self.finding.category
            && raw
                .evidence
                .iter()
                .any(|e| self.locations.contains(&(e.doc_id.clone(), e.page_num)))
    }

    fn best_title_score(&self, title: &str) -> f64 {
        self.titles
            .iter()
            .map(|t| title_similarity(t, title))
            .fold(0.0, f64::max)
    }

    fn absorb(&mut self, id: RiskId, raw: &RawFinding) {
        self.finding.severity = self.finding.severity.max(raw.severity);
        self.finding.likelihood = self.finding.likelihood.most_likely(raw.likelihood);
        self.finding.merged_from.push(id);
        self.titles.push(raw.title.clone());
        self.add_details(raw);
    }

    /// Take over a later cluster that turned out to be the same risk.
    fn fold(&mut self, other: Cluster) {
        self.finding.severity = self.finding.severity.max(other.finding.severity);
        self.finding.likelihood = self.finding.likelihood.most_likely(other.finding.likelihood);
        self.finding.merged_from.push(other.finding.risk_id);
        self.finding.merged_from.extend(other.finding.merged_from);
        self.titles.extend(other.titles);
        for evidence in other.finding.evidence {
            if !self.finding.evidence.contains(&evidence) {
                self.finding.evidence.push(evidence);
            }
        }
        self.locations.extend(other.locations);
        for mitigation in &other.mitigations {
            push_distinct(&mut self.mitigations, mitigation);
        }
        for basis in &other.legal_bases {
            push_distinct(&mut self.legal_bases, basis);
        }
    }

    fn add_details(&mut self, raw: &RawFinding) {
        for evidence in &raw.evidence {
            if !self.finding.evidence.contains(evidence) {
                self.finding.evidence.push(evidence.clone());
            }
            self.locations
                .insert((evidence.doc_id.clone(), evidence.page_num));
        }
        push_distinct(&mut self.mitigations, &raw.mitigation);
        push_distinct(&mut self.legal_bases, &raw.legal_basis);
    }

    fn into_finding(mut self) -> RiskFinding {
        self.finding.merged_from.sort();
        self.finding.mitigation = self.mitigations.join("\n");
        self.finding.legal_basis = self.legal_bases.join("; ");
        self.finding
    }
}

fn push_distinct(items: &mut Vec<String>, candidate: &str) {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return;
    }
    if !items.iter().any(|i| i.eq_ignore_ascii_case(candidate)) {
        items.push(candidate.to_string());
    }
}

/// Order-preserving, de-duplicated list of limitation notes.
#[derive(Default)]
struct Limitations {
    seen: BTreeSet<String>,
    items: Vec<String>,
}

impl Limitations {
    fn push(&mut self, note: String) {
        if self.seen.insert(note.clone()) {
            self.items.push(note);
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.items
    }
}
