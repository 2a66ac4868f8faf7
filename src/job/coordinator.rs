//! Job coordinator.
//!
//! The coordinator task is the only writer of a job record. Each job runs in
//! its own spawned task that walks the state machine: plan batches, dispatch
//! them, integrate the findings, fan out to the deliverable generators and
//! settle on a terminal status. Everything else reports back through return
//! values or `DispatchEvent`s.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::deliverables::{DeliverableContext, DeliverableGenerator, DeliverableOutcome, run_deliverables};
use crate::error::{DispatchError, Error, JobError, StoreError, ValidationError};
use crate::job::registry::{JobRegistry, RegistrySummary};
use crate::job::state::{Job, JobStatus, JobStatusView};
use crate::llm::ReasoningEngine;
use crate::risk::{Category, RiskFinding, RiskRegister, Severity, UnanalyzedBatch, integrate};
use crate::store::ContentStore;
use crate::worker::{CancelFlag, DispatchEvent, Dispatcher, plan_batches};

/// A job submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    pub document_ids: Vec<String>,
    /// Documents that should be read together in one batch.
    #[serde(default)]
    pub related_groups: Vec<Vec<String>>,
}

/// Answer to a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    /// Flag set; the job stops at its next checkpoint.
    Requested,
    /// Deliverables are already being generated.
    TooLate(JobStatus),
    AlreadyTerminal(JobStatus),
}

struct Inner {
    store: Arc<dyn ContentStore>,
    dispatcher: Dispatcher,
    generators: Vec<Arc<dyn DeliverableGenerator>>,
    config: OrchestratorConfig,
    registry: JobRegistry,
}

/// Accepts jobs and drives each one to a terminal status.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        engine: Arc<dyn ReasoningEngine>,
        generators: Vec<Arc<dyn DeliverableGenerator>>,
        config: OrchestratorConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&store), engine, config.dispatch.clone());
        let registry = JobRegistry::new(config.max_active_jobs);
        Self {
            inner: Arc::new(Inner {
                store,
                dispatcher,
                generators,
                config,
                registry,
            }),
        }
    }

    /// Submit a job over `document_ids`.
    pub async fn submit(
        &self,
        document_ids: Vec<String>,
        name: impl Into<String>,
    ) -> Result<Uuid, Error> {
        self.submit_request(JobRequest {
            name: name.into(),
            document_ids,
            related_groups: Vec::new(),
        })
        .await
    }

    /// Submit a job with related-document groups.
    pub async fn submit_request(&self, request: JobRequest) -> Result<Uuid, Error> {
        let (document_ids, related_groups) = self.inner.validate(&request).await?;

        let job = Job::new(request.name.trim(), document_ids, related_groups);
        let job_id = job.job_id;
        let documents = job.document_ids.len();
        let cancel = self.inner.registry.insert(job).await?;

        info!(job_id = %job_id, documents, "Job submitted");
        tokio::spawn(run_job(Arc::clone(&self.inner), job_id, cancel));
        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusView, JobError> {
        self.inner.registry.status(job_id).await
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job, JobError> {
        self.inner.registry.get(job_id).await
    }

    /// Risks of a completed job, optionally filtered. Empty while running and
    /// for failed or cancelled jobs.
    pub async fn get_risks(
        &self,
        job_id: Uuid,
        category: Option<Category>,
        severity: Option<Severity>,
    ) -> Result<Vec<RiskFinding>, JobError> {
        Ok(self
            .inner
            .registry
            .register(job_id)
            .await?
            .map(|register| register.filter(category, severity))
            .unwrap_or_default())
    }

    pub async fn get_register(&self, job_id: Uuid) -> Result<Option<Arc<RiskRegister>>, JobError> {
        self.inner.registry.register(job_id).await
    }

    /// Request cancellation. Best effort: running tasks finish their current
    /// call, and a job already generating deliverables runs to completion.
    pub async fn cancel(&self, job_id: Uuid) -> Result<CancelAck, JobError> {
        let ack = self
            .inner
            .registry
            .update_with_cancel(job_id, |job, flag| {
                if job.status.is_terminal() {
                    CancelAck::AlreadyTerminal(job.status)
                } else if !job.status.can_transition_to(JobStatus::Cancelled) {
                    CancelAck::TooLate(job.status)
                } else {
                    flag.cancel();
                    CancelAck::Requested
                }
            })
            .await?;
        if ack == CancelAck::Requested {
            info!(job_id = %job_id, "Cancellation requested");
        }
        Ok(ack)
    }

    /// Suspend until the job is terminal.
    pub async fn wait(&self, job_id: Uuid) -> Result<JobStatusView, JobError> {
        let mut rx = self.inner.registry.subscribe(job_id).await?;
        if rx.wait_for(|status| status.is_terminal()).await.is_err() {
            warn!(job_id = %job_id, "Status channel closed before job finished");
        }
        self.inner.registry.status(job_id).await
    }

    pub async fn summary(&self) -> RegistrySummary {
        self.inner.registry.summary().await
    }
}

impl Inner {
    /// Normalize a request: trimmed name, deduplicated ids, every id known
    /// to the store and every grouped id part of the job.
    async fn validate(
        &self,
        request: &JobRequest,
    ) -> Result<(Vec<String>, Vec<Vec<String>>), Error> {
        if request.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }

        let mut seen = HashSet::new();
        let document_ids: Vec<String> = request
            .document_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        if document_ids.is_empty() {
            return Err(ValidationError::EmptyDocumentSet.into());
        }

        let mut unknown = Vec::new();
        for doc_id in &document_ids {
            match self.store.get_summary(doc_id).await {
                Ok(_) => {}
                Err(StoreError::NotFound { .. }) => unknown.push(doc_id.clone()),
                Err(e) => return Err(e.into()),
            }
        }
        for group in &request.related_groups {
            for doc_id in group {
                if !seen.contains(doc_id) && !unknown.contains(doc_id) {
                    unknown.push(doc_id.clone());
                }
            }
        }
        if !unknown.is_empty() {
            return Err(ValidationError::UnknownDocuments { ids: unknown }.into());
        }

        let related_groups = request
            .related_groups
            .iter()
            .filter(|g| !g.is_empty())
            .cloned()
            .collect();
        Ok((document_ids, related_groups))
    }

    /// Move to `Cancelled` if cancellation was requested.
    async fn checkpoint(&self, job_id: Uuid, cancel: &CancelFlag, next: &str) -> Result<bool, Error> {
        if !cancel.is_cancelled() {
            return Ok(false);
        }
        info!(job_id = %job_id, next, "Job cancelled at checkpoint");
        self.registry
            .transition(job_id, JobStatus::Cancelled, Some(format!("Cancelled before {next}")))
            .await?;
        Ok(true)
    }

    async fn drive(&self, job_id: Uuid, cancel: &CancelFlag) -> Result<(), Error> {
        if self.checkpoint(job_id, cancel, "planning").await? {
            return Ok(());
        }
        self.registry
            .transition(job_id, JobStatus::Planning, Some("Planning batches".into()))
            .await?;

        let job = self.registry.get(job_id).await?;
        let batches = plan_batches(&job.document_ids, &job.related_groups, self.dispatcher.config());
        let total = batches.len();
        info!(job_id = %job_id, batches = total, "Planned batches");

        if self.checkpoint(job_id, cancel, "dispatching").await? {
            return Ok(());
        }
        self.registry
            .update(job_id, |job| {
                job.total_tasks = total;
                job.transition_to(
                    JobStatus::Dispatching,
                    Some(format!("Dispatching {total} batches")),
                )
            })
            .await??;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcome, ()) = tokio::join!(
            self.dispatcher.dispatch(job_id, batches, cancel, Some(events_tx)),
            self.track_progress(job_id, events_rx),
        );

        if self.checkpoint(job_id, cancel, "integrating").await? {
            return Ok(());
        }
        let report = outcome?;
        self.registry
            .update(job_id, |job| {
                if job.status == JobStatus::Dispatching {
                    job.transition_to(JobStatus::Analyzing, None)
                } else {
                    Ok(())
                }
            })
            .await??;

        self.registry
            .transition(job_id, JobStatus::Integrating, Some("Integrating findings".into()))
            .await?;
        let unanalyzed = report.unanalyzed();
        let integration = integrate(&report.finding_sets(), &unanalyzed, &self.config.merge);
        for ambiguity in &integration.ambiguities {
            warn!(job_id = %job_id, "{ambiguity}");
        }
        let register = Arc::new(integration.register);
        info!(
            job_id = %job_id,
            risks = register.risks.len(),
            unanalyzed = unanalyzed.len(),
            "Findings integrated"
        );

        if self.begin_deliverables(job_id).await? {
            return Ok(());
        }

        let ctx = DeliverableContext {
            job_id,
            job_name: job.name.clone(),
            document_ids: job.document_ids.clone(),
            output_dir: self.config.deliverables.output_dir.clone(),
            generated_at: Utc::now(),
        };
        let outcomes = run_deliverables(
            &self.generators,
            &ctx,
            Arc::clone(&register),
            self.config.deliverables.generator_timeout,
        )
        .await;

        self.settle(job_id, register, &unanalyzed, total, outcomes).await
    }

    /// Enter `GeneratingDeliverables`, or `Cancelled` if cancellation was
    /// requested first. Past this point `cancel` answers `TooLate`.
    async fn begin_deliverables(&self, job_id: Uuid) -> Result<bool, Error> {
        let cancelled = self
            .registry
            .update_with_cancel(job_id, |job, flag| {
                if flag.is_cancelled() {
                    job.transition_to(
                        JobStatus::Cancelled,
                        Some("Cancelled before generating deliverables".into()),
                    )
                    .map(|()| true)
                } else {
                    job.transition_to(
                        JobStatus::GeneratingDeliverables,
                        Some("Generating deliverables".into()),
                    )
                    .map(|()| false)
                }
            })
            .await??;
        if cancelled {
            info!(job_id = %job_id, "Job cancelled before generating deliverables");
        }
        Ok(cancelled)
    }

    async fn track_progress(&self, job_id: Uuid, mut events: mpsc::UnboundedReceiver<DispatchEvent>) {
        while let Some(event) = events.recv().await {
            let result = match event {
                DispatchEvent::TaskStarted { .. } => {
                    self.registry
                        .update(job_id, |job| {
                            if job.status == JobStatus::Dispatching {
                                job.transition_to(
                                    JobStatus::Analyzing,
                                    Some("Analyzing documents".into()),
                                )
                            } else {
                                Ok(())
                            }
                        })
                        .await
                }
                DispatchEvent::TaskFinished { .. } => {
                    self.registry
                        .update(job_id, |job| {
                            job.record_task_finished();
                            Ok(())
                        })
                        .await
                }
            };
            if let Err(e) = result.and_then(|recorded| recorded) {
                warn!(job_id = %job_id, error = %e, "Failed to record task progress");
            }
        }
    }

    /// Apply the deliverable policy and reach a terminal status.
    async fn settle(
        &self,
        job_id: Uuid,
        register: Arc<RiskRegister>,
        unanalyzed: &[UnanalyzedBatch],
        total_batches: usize,
        outcomes: Vec<DeliverableOutcome>,
    ) -> Result<(), Error> {
        let policy = &self.config.deliverables;
        let failed: Vec<&DeliverableOutcome> = outcomes.iter().filter(|o| !o.succeeded()).collect();
        let all_failed = !outcomes.is_empty() && failed.len() == outcomes.len();

        let mut limitations = register.limitations.clone();
        let mut problems = Vec::new();
        if !unanalyzed.is_empty() {
            problems.push(format!(
                "{} of {} batches not analyzed",
                unanalyzed.len(),
                total_batches
            ));
        }
        for outcome in &failed {
            let reason = outcome.error.as_deref().unwrap_or("unknown error");
            limitations.push(format!("Deliverable {} not produced: {reason}", outcome.generator));
            problems.push(format!("{}: {reason}", outcome.generator));
        }

        let status = if all_failed {
            JobStatus::Failed
        } else if policy.require_all && !failed.is_empty() {
            JobStatus::Failed
        } else if !unanalyzed.is_empty() || (policy.warn_on_partial && !failed.is_empty()) {
            JobStatus::CompletedWithWarnings
        } else {
            JobStatus::Completed
        };

        let step = match status {
            JobStatus::Failed if all_failed => "No deliverable produced".to_string(),
            JobStatus::Failed => "Required deliverable missing".to_string(),
            _ => format!("Produced {} of {} deliverables", outcomes.len() - failed.len(), outcomes.len()),
        };

        if status != JobStatus::Failed {
            self.registry.set_register(job_id, register).await?;
        }
        self.registry
            .update(job_id, |job| {
                job.limitations = limitations;
                job.deliverables = outcomes;
                if !problems.is_empty() {
                    job.error = Some(problems.join("; "));
                }
                job.transition_to(status, Some(step))
            })
            .await??;

        info!(job_id = %job_id, status = %status, "Job finished");
        Ok(())
    }
}

async fn run_job(inner: Arc<Inner>, job_id: Uuid, cancel: CancelFlag) {
    let Err(e) = inner.drive(job_id, &cancel).await else {
        return;
    };

    error!(job_id = %job_id, error = %e, "Job failed");
    let message = e.to_string();
    let uncovered: Vec<String> = match &e {
        Error::Dispatch(DispatchError::NoSuccessfulTasks { unanalyzed, .. }) => {
            unanalyzed.iter().map(UnanalyzedBatch::limitation).collect()
        }
        _ => Vec::new(),
    };
    let result = inner
        .registry
        .update(job_id, |job| {
            if job.status.is_terminal() {
                return Ok(());
            }
            job.limitations.extend(uncovered);
            job.error = Some(message.clone());
            job.transition_to(JobStatus::Failed, Some(message))
        })
        .await;
    if let Err(e) = result.and_then(|transition| transition) {
        warn!(job_id = %job_id, error = %e, "Failed to record job failure");
    }
}
