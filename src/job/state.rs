//! Job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deliverables::DeliverableOutcome;
use crate::error::JobError;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, no work started.
    Pending,
    /// Computing batches.
    Planning,
    /// Tasks queued, none started yet.
    Dispatching,
    /// Tasks running.
    Analyzing,
    /// Merging task findings.
    Integrating,
    /// Generators running against the register.
    GeneratingDeliverables,
    Completed,
    /// Completed, but some documents or deliverables were not covered.
    CompletedWithWarnings,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Check if this status allows transitioning to another.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Planning) | (Planning, Dispatching) |
            (Dispatching, Analyzing) | (Analyzing, Integrating) |
            (Integrating, GeneratingDeliverables) |
            (GeneratingDeliverables, Completed) |
            (GeneratingDeliverables, CompletedWithWarnings) |
            // Failure from anywhere still running
            (Pending | Planning | Dispatching | Analyzing | Integrating
                | GeneratingDeliverables, Failed) |
            // Cancellation up to the last checkpoint
            (Pending | Planning | Dispatching | Analyzing | Integrating, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithWarnings | Self::Failed | Self::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Progress floor on entering this status.
    pub fn progress_floor(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Planning => 5,
            Self::Dispatching | Self::Analyzing => 10,
            Self::Integrating => 85,
            Self::GeneratingDeliverables => 90,
            Self::Completed | Self::CompletedWithWarnings => 100,
            Self::Failed | Self::Cancelled => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Dispatching => "dispatching",
            Self::Analyzing => "analyzing",
            Self::Integrating => "integrating",
            Self::GeneratingDeliverables => "generating_deliverables",
            Self::Completed => "completed",
            Self::CompletedWithWarnings => "completed_with_warnings",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Start and width of the progress band covered by task completion.
const ANALYZING_SPAN: (u8, u8) = (10, 70);

/// The job record. Only the coordinator mutates it.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: Uuid,
    pub name: String,
    pub document_ids: Vec<String>,
    pub related_groups: Vec<Vec<String>>,
    pub status: JobStatus,
    /// 0-100, never decreases.
    pub progress: u8,
    pub current_step: String,
    /// Aggregated human-readable summary of what went wrong.
    pub error: Option<String>,
    /// Documents or deliverables that were not covered.
    pub limitations: Vec<String>,
    pub deliverables: Vec<DeliverableOutcome>,
    pub total_tasks: usize,
    pub finished_tasks: usize,
    pub risk_count: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StateTransition>,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        document_ids: Vec<String>,
        related_groups: Vec<Vec<String>>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            name: name.into(),
            document_ids,
            related_groups,
            status: JobStatus::Pending,
            progress: 0,
            current_step: "Queued".to_string(),
            error: None,
            limitations: Vec::new(),
            deliverables: Vec::new(),
            total_tasks: 0,
            finished_tasks: 0,
            risk_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            transitions: Vec::new(),
        }
    }

    /// Move to `new_status`, recording the transition.
    pub fn transition_to(
        &mut self,
        new_status: JobStatus,
        reason: Option<String>,
    ) -> Result<(), JobError> {
        if !self.status.can_transition_to(new_status) {
            return Err(JobError::InvalidTransition {
                id: self.job_id,
                state: self.status.to_string(),
                target: new_status.to_string(),
            });
        }

        if let Some(step) = &reason {
            self.current_step = step.clone();
        }
        self.transitions.push(StateTransition {
            from: self.status,
            to: new_status,
            timestamp: Utc::now(),
            reason,
        });

        // Cap transition history to prevent unbounded memory growth
        const MAX_TRANSITIONS: usize = 200;
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }

        self.status = new_status;
        self.progress = self.progress.max(new_status.progress_floor());

        match new_status {
            JobStatus::Planning if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            s if s.is_terminal() => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }

        Ok(())
    }

    /// Count one more terminal task and advance progress.
    pub fn record_task_finished(&mut self) {
        self.finished_tasks = (self.finished_tasks + 1).min(self.total_tasks);
        if self.status.is_terminal() || self.total_tasks == 0 {
            return;
        }
        let (start, width) = ANALYZING_SPAN;
        let done = (self.finished_tasks * width as usize / self.total_tasks) as u8;
        self.progress = self.progress.max(start + done);
        self.current_step = format!(
            "Analyzed {} of {} batches",
            self.finished_tasks, self.total_tasks
        );
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id,
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            error: self.error.clone(),
        }
    }
}

/// Snapshot returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: String,
    pub error: Option<String>,
}
