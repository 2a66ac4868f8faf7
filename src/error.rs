//! Error types for riskroom.

use std::time::Duration;

use uuid::Uuid;

use crate::risk::UnanalyzedBatch;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Content store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Reasoning error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Content store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document {doc_id} not found")]
    NotFound { doc_id: String },

    /// The backing store could not serve the request right now. Retryable.
    #[error("Content store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Invalid corpus: {0}")]
    InvalidCorpus(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed job submissions.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Job must reference at least one document")]
    EmptyDocumentSet,

    #[error("Unknown document ids: {}", ids.join(", "))]
    UnknownDocuments { ids: Vec<String> },

    #[error("Job name must not be empty")]
    EmptyName,
}

/// Job-related errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },

    #[error("Maximum active jobs ({max}) exceeded")]
    MaxJobsExceeded { max: usize },
}

/// Failures of a single dispatched task attempt.
///
/// `Transient` and `Timeout` are retried by the dispatcher; `Fatal` is not.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error("Transient worker error: {reason}")]
    Transient { reason: String },

    #[error("Fatal worker error: {reason}")]
    Fatal { reason: String },

    #[error("Task attempt timed out after {after:?}")]
    Timeout { after: Duration },
}

impl WorkerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

impl From<StoreError> for WorkerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable { .. } | StoreError::Io(_) => Self::Transient {
                reason: e.to_string(),
            },
            other => Self::Fatal {
                reason: other.to_string(),
            },
        }
    }
}

impl From<ReasoningError> for WorkerError {
    fn from(e: ReasoningError) -> Self {
        match e {
            ReasoningError::Transient(_) => Self::Transient {
                reason: e.to_string(),
            },
            ReasoningError::Schema(_) | ReasoningError::Permanent(_) => Self::Fatal {
                reason: e.to_string(),
            },
        }
    }
}

/// Job-level dispatch failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Nothing to dispatch: batch plan is empty")]
    EmptyPlan,

    #[error("All {failed} tasks failed: {summary}")]
    NoSuccessfulTasks {
        failed: usize,
        summary: String,
        /// Every batch of the job, in task order.
        unanalyzed: Vec<UnanalyzedBatch>,
    },
}

/// Reasoning collaborator failures.
#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    /// Output did not match the findings schema.
    #[error("Schema violation: {0}")]
    Schema(String),

    #[error("Transient reasoning failure: {0}")]
    Transient(String),

    #[error("Reasoning failed: {0}")]
    Permanent(String),
}

impl From<LlmError> for ReasoningError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::RateLimited { .. } | LlmError::RequestFailed { .. } => {
                Self::Transient(e.to_string())
            }
            LlmError::InvalidResponse { .. } | LlmError::Json(_) => Self::Schema(e.to_string()),
            LlmError::AuthFailed { .. } | LlmError::ContextLengthExceeded { .. } => {
                Self::Permanent(e.to_string())
            }
        }
    }
}

/// Deliverable generator failures. Never fatal to a job on their own.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("Generator {generator} failed: {reason}")]
    Failed { generator: String, reason: String },

    #[error("Generator {generator} timed out after {after:?}")]
    Timeout { generator: String, after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Context length exceeded: {used} tokens used, {limit} allowed")]
    ContextLengthExceeded { used: usize, limit: usize },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_unavailable_is_transient() {
        let err: WorkerError = StoreError::Unavailable {
            reason: "backend busy".into(),
        }
        .into();
        assert!(err.is_retryable());

        let err: WorkerError = StoreError::NotFound {
            doc_id: "D9".into(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn schema_errors_are_fatal() {
        let err: WorkerError = ReasoningError::Schema("missing risks".into()).into();
        assert!(matches!(err, WorkerError::Fatal { .. }));

        let err: WorkerError = ReasoningError::Transient("503".into()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn llm_rate_limit_maps_to_transient() {
        let err: ReasoningError = LlmError::RateLimited {
            provider: "anthropic".into(),
            retry_after: None,
        }
        .into();
        assert!(matches!(err, ReasoningError::Transient(_)));

        let err: ReasoningError = LlmError::AuthFailed {
            provider: "anthropic".into(),
        }
        .into();
        assert!(matches!(err, ReasoningError::Permanent(_)));
    }

    #[test]
    fn unknown_documents_message_lists_ids() {
        let err = ValidationError::UnknownDocuments {
            ids: vec!["D7".into(), "D8".into()],
        };
        assert_eq!(err.to_string(), "Unknown document ids: D7, D8");
    }
}
