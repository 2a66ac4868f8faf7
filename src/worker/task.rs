//! Task records and dispatch events.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::risk::FindingSet;

/// Lifecycle of one dispatched batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt at running a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// `None` when the attempt succeeded.
    pub error: Option<String>,
}

impl AttemptRecord {
    pub fn new(attempt: u32) -> Self {
        Self {
            attempt,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            error: None,
        }
    }

    pub fn succeed(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn fail(mut self, error: impl Into<String>, duration: Duration) -> Self {
        self.error = Some(error.into());
        self.duration = duration;
        self
    }
}

/// Terminal outcome of one task, returned by the dispatcher.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub sequence: usize,
    pub document_ids: Vec<String>,
    pub state: TaskState,
    pub attempts: Vec<AttemptRecord>,
    /// Present only when `state` is `Succeeded`.
    pub findings: Option<FindingSet>,
    /// Last error, for failed and timed-out tasks.
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl TaskResult {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Succeeded
    }
}

/// Progress notification posted by the dispatcher. Never mutates the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    TaskStarted {
        task_id: Uuid,
        sequence: usize,
        attempt: u32,
    },
    TaskFinished {
        task_id: Uuid,
        sequence: usize,
        state: TaskState,
    },
}
