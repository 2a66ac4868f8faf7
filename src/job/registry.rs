//! Job registry for tracking concurrent jobs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use crate::error::JobError;
use crate::job::state::{Job, JobStatus, JobStatusView};
use crate::risk::RiskRegister;
use crate::worker::CancelFlag;

struct JobEntry {
    job: Job,
    /// Set once, on successful completion.
    register: Option<Arc<RiskRegister>>,
    cancel: CancelFlag,
    status_tx: watch::Sender<JobStatus>,
}

/// Holds every submitted job, its register and its cancellation flag.
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    /// Maximum concurrent non-terminal jobs.
    max_active: usize,
}

impl JobRegistry {
    pub fn new(max_active: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_active,
        }
    }

    /// Register a freshly created job.
    pub async fn insert(&self, job: Job) -> Result<CancelFlag, JobError> {
        let mut jobs = self.jobs.write().await;
        let active_count = jobs.values().filter(|e| e.job.status.is_active()).count();

        if active_count >= self.max_active {
            return Err(JobError::MaxJobsExceeded {
                max: self.max_active,
            });
        }

        let cancel = CancelFlag::new();
        let (status_tx, _) = watch::channel(job.status);
        jobs.insert(
            job.job_id,
            JobEntry {
                job,
                register: None,
                cancel: cancel.clone(),
                status_tx,
            },
        );
        Ok(cancel)
    }

    /// Snapshot of the full job record.
    pub async fn get(&self, job_id: Uuid) -> Result<Job, JobError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(|e| e.job.clone())
            .ok_or(JobError::NotFound { id: job_id })
    }

    pub async fn status(&self, job_id: Uuid) -> Result<JobStatusView, JobError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(|e| e.job.status_view())
            .ok_or(JobError::NotFound { id: job_id })
    }

    /// The job's register, if it completed.
    pub async fn register(&self, job_id: Uuid) -> Result<Option<Arc<RiskRegister>>, JobError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(|e| e.register.clone())
            .ok_or(JobError::NotFound { id: job_id })
    }

    pub async fn cancel_flag(&self, job_id: Uuid) -> Result<CancelFlag, JobError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(|e| e.cancel.clone())
            .ok_or(JobError::NotFound { id: job_id })
    }

    /// Watch the job's status.
    pub async fn subscribe(&self, job_id: Uuid) -> Result<watch::Receiver<JobStatus>, JobError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(|e| e.status_tx.subscribe())
            .ok_or(JobError::NotFound { id: job_id })
    }

    /// Mutate a job record. Watchers are told the resulting status.
    pub(crate) async fn update<F, R>(&self, job_id: Uuid, f: F) -> Result<R, JobError>
    where
        F: FnOnce(&mut Job) -> R,
    {
        self.update_with_cancel(job_id, |job, _| f(job)).await
    }

    /// Like `update`, with the job's cancel flag read or set under the same
    /// lock as the status.
    pub(crate) async fn update_with_cancel<F, R>(&self, job_id: Uuid, f: F) -> Result<R, JobError>
    where
        F: FnOnce(&mut Job, &CancelFlag) -> R,
    {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&job_id)
            .ok_or(JobError::NotFound { id: job_id })?;
        let result = f(&mut entry.job, &entry.cancel);
        entry.status_tx.send_replace(entry.job.status);
        Ok(result)
    }

    pub(crate) async fn transition(
        &self,
        job_id: Uuid,
        status: JobStatus,
        reason: Option<String>,
    ) -> Result<(), JobError> {
        self.update(job_id, |job| job.transition_to(status, reason))
            .await?
    }

    pub(crate) async fn set_register(
        &self,
        job_id: Uuid,
        register: Arc<RiskRegister>,
    ) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&job_id)
            .ok_or(JobError::NotFound { id: job_id })?;
        entry.job.risk_count = register.risks.len();
        entry.register = Some(register);
        Ok(())
    }

    pub async fn active_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|e| e.job.status.is_active())
            .count()
    }

    /// Get summary of all jobs.
    pub async fn summary(&self) -> RegistrySummary {
        let jobs = self.jobs.read().await;

        let mut summary = RegistrySummary::default();
        for entry in jobs.values() {
            match entry.job.status {
                JobStatus::Pending => summary.pending += 1,
                JobStatus::Planning
                | JobStatus::Dispatching
                | JobStatus::Analyzing
                | JobStatus::Integrating
                | JobStatus::GeneratingDeliverables => summary.running += 1,
                JobStatus::Completed => summary.completed += 1,
                JobStatus::CompletedWithWarnings => summary.completed_with_warnings += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Cancelled => summary.cancelled += 1,
            }
        }

        summary.total = jobs.len();
        summary
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Counts of jobs per status group.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistrySummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub completed_with_warnings: usize,
    pub failed: usize,
    pub cancelled: usize,
}
