//! riskroom: legal risk analysis orchestration.

pub mod config;
pub mod deliverables;
pub mod error;
pub mod job;
pub mod llm;
pub mod risk;
pub mod store;
pub mod worker;

pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use job::{CancelAck, JobRequest, JobStatus, Orchestrator};
