//! Jobs: the state machine, the registry holding every job, and the
//! coordinator that drives each job to a terminal status.

pub mod coordinator;
pub mod registry;
pub mod state;

pub use coordinator::{CancelAck, JobRequest, Orchestrator};
pub use registry::{JobRegistry, RegistrySummary};
pub use state::{Job, JobStatus, JobStatusView, StateTransition};
