//! Batch planning.
//!
//! `plan_batches` is a pure function of its inputs: the same documents, groups
//! and config always yield the same partition.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::DispatchConfig;

/// A group of documents analyzed together by one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Submission order; also the order findings are numbered in.
    pub sequence: usize,
    pub document_ids: Vec<String>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.document_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty()
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.document_ids.iter().any(|d| d == doc_id)
    }
}

/// Partition `document_ids` into batches of at most `max_batch`.
///
/// Related groups are placed first, in the order given, and are only split
/// when larger than `max_batch`. Group members not in `document_ids` are
/// ignored, and a document listed in several groups stays with the first.
/// Remaining documents follow in sorted order. Batches are filled first-fit,
/// then a batch under `min_batch` borrows ungrouped documents from batches
/// that stay at or above `min_batch`. `min_batch` is a floor only where
/// that is possible.
pub fn plan_batches(
    document_ids: &[String],
    related_groups: &[Vec<String>],
    config: &DispatchConfig,
) -> Vec<Batch> {
    let max = config.max_batch.max(1);
    let wanted: BTreeSet<&str> = document_ids.iter().map(String::as_str).collect();
    let mut placed: BTreeSet<&str> = BTreeSet::new();

    let mut units: Vec<Vec<String>> = Vec::new();
    for group in related_groups {
        let mut members = Vec::new();
        for doc in group {
            if wanted.contains(doc.as_str()) && placed.insert(doc.as_str()) {
                members.push(doc.clone());
            }
        }
        for chunk in members.chunks(max) {
            units.push(chunk.to_vec());
        }
    }
    for doc in &wanted {
        if !placed.contains(doc) {
            units.push(vec![doc.to_string()]);
        }
    }

    // Each bin keeps its units so balancing can move whole units.
    let mut bins: Vec<Vec<Vec<String>>> = Vec::new();
    for unit in units {
        match bins.iter_mut().find(|b| size(b) + unit.len() <= max) {
            Some(bin) => bin.push(unit),
            None => bins.push(vec![unit]),
        }
    }

    top_up_small_bins(&mut bins, config.min_batch);

    bins.into_iter()
        .enumerate()
        .map(|(sequence, units)| Batch {
            sequence,
            document_ids: units.into_iter().flatten().collect(),
        })
        .collect()
}

fn size(bin: &[Vec<String>]) -> usize {
    bin.iter().map(Vec::len).sum()
}

/// Move ungrouped documents into bins below `min` from bins that can spare
/// them. Grouped documents never move.
fn top_up_small_bins(bins: &mut [Vec<Vec<String>>], min: usize) {
    for idx in 0..bins.len() {
        while size(&bins[idx]) < min {
            let donor = (0..bins.len()).find(|&j| {
                j != idx && size(&bins[j]) > min && bins[j].iter().any(|u| u.len() == 1)
            });
            let Some(j) = donor else { break };
            let Some(pos) = bins[j].iter().rposition(|u| u.len() == 1) else {
                break;
            };
            let unit = bins[j].remove(pos);
            bins[idx].insert(0, unit);
        }
    }
}
