//! Per-batch worker execution.
//!
//! One `BatchWorker` runs one attempt of one task: pull summaries, pick the
//! pages worth reading, fetch only those, hand the batch to the reasoning
//! engine and check what comes back.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::WorkerError;
use crate::llm::{AnalysisBatch, AnalysisContext, AnalysisDocument, ReasoningEngine};
use crate::risk::{FindingSet, RawFinding};
use crate::store::{ContentStore, DocumentSummary};
use crate::worker::batch::Batch;
use crate::worker::scratch::Scratch;

/// Shared dependencies for worker execution.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn ContentStore>,
    pub engine: Arc<dyn ReasoningEngine>,
    pub config: Arc<DispatchConfig>,
}

/// Worker for a single batch.
pub struct BatchWorker {
    job_id: Uuid,
    task_id: Uuid,
    batch: Batch,
    deps: WorkerDeps,
}

impl BatchWorker {
    pub fn new(job_id: Uuid, task_id: Uuid, batch: Batch, deps: WorkerDeps) -> Self {
        Self {
            job_id,
            task_id,
            batch,
            deps,
        }
    }

    fn store(&self) -> &Arc<dyn ContentStore> {
        &self.deps.store
    }

    fn config(&self) -> &DispatchConfig {
        &self.deps.config
    }

    /// Run one attempt. The scratch arena carries cached summaries between
    /// attempts of the same task.
    pub async fn run(&self, scratch: &mut Scratch) -> Result<FindingSet, WorkerError> {
        let mut documents = Vec::with_capacity(self.batch.len());
        for doc_id in &self.batch.document_ids {
            documents.push(self.gather(doc_id, scratch).await?);
        }

        let analysis = AnalysisBatch {
            sequence: self.batch.sequence,
            documents,
        };
        let ctx = AnalysisContext {
            job_id: self.job_id,
            task_id: self.task_id,
            attempt: scratch.attempt(),
            focus_terms: self.config().focus_terms.clone(),
        };

        let findings = self.deps.engine.analyze(&analysis, &ctx).await?;
        check_evidence(&findings, &self.batch)?;

        debug!(
            task_id = %self.task_id,
            findings = findings.len(),
            "Batch analyzed"
        );
        Ok(FindingSet {
            sequence: self.batch.sequence,
            findings,
            limitations: scratch.limitations().to_vec(),
        })
    }

    async fn gather(
        &self,
        doc_id: &str,
        scratch: &mut Scratch,
    ) -> Result<AnalysisDocument, WorkerError> {
        let key = format!("summary/{doc_id}");
        let summary = match scratch.get::<DocumentSummary>(&key) {
            Some(cached) => cached,
            None => {
                let fetched = self.store().get_summary(doc_id).await?;
                cache(scratch, &key, &fetched);
                fetched
            }
        };

        let selection = select_pages(
            &summary,
            &self.config().focus_terms,
            self.config().max_pages_per_doc,
        );
        cache(scratch, &format!("selection/{doc_id}"), &selection);

        let pages = if selection.is_empty() {
            Vec::new()
        } else {
            let fetch = self.store().get_pages(doc_id, Some(&selection)).await?;
            if !fetch.is_complete() {
                let missing: Vec<String> =
                    fetch.missing_pages.iter().map(u32::to_string).collect();
                scratch.add_limitation(format!(
                    "{doc_id}: pages {} unavailable",
                    missing.join(", ")
                ));
            }
            scratch.note(format!(
                "{doc_id}: read {} of {} pages",
                fetch.pages.len(),
                summary.page_count
            ));
            fetch.pages
        };

        Ok(AnalysisDocument {
            doc_id: summary.doc_id.clone(),
            title: summary.title.clone(),
            summary: summary.combined(),
            pages,
        })
    }
}

fn cache<T: serde::Serialize>(scratch: &mut Scratch, key: &str, value: &T) {
    if let Err(e) = scratch.put(key, value) {
        tracing::warn!(key, error = %e, "Failed to cache scratch entry");
    }
}

/// Pages whose summary mentions a focus term, capped at `cap`. Falls back to
/// the first page when nothing matches.
pub fn select_pages(summary: &DocumentSummary, focus_terms: &[String], cap: usize) -> Vec<u32> {
    let terms: Vec<String> = focus_terms.iter().map(|t| t.to_lowercase()).collect();
    let mut selected: Vec<u32> = summary
        .pages
        .iter()
        .filter(|p| {
            let text = p.summary.to_lowercase();
            terms.iter().any(|t| text.contains(t.as_str()))
        })
        .map(|p| p.page_num)
        .take(cap)
        .collect();

    if selected.is_empty() && cap > 0 {
        selected.extend(summary.pages.first().map(|p| p.page_num));
    }
    selected
}

/// Every citation must point at a page (>= 1) of a document in the batch.
fn check_evidence(findings: &[RawFinding], batch: &Batch) -> Result<(), WorkerError> {
    for finding in findings {
        for evidence in &finding.evidence {
            if !batch.contains(&evidence.doc_id) {
                return Err(WorkerError::Fatal {
                    reason: format!(
                        "finding \"{}\" cites {} outside its batch",
                        finding.title, evidence.doc_id
                    ),
                });
            }
            if evidence.page_num == 0 {
                return Err(WorkerError::Fatal {
                    reason: format!("finding \"{}\" cites page 0", finding.title),
                });
            }
        }
    }
    Ok(())
}
