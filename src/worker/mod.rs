//! Worker pool.
//!
//! Core components:
//! - `batch`: pure batch planning
//! - `scratch`: per-task scratch arena
//! - `task`: task states, results and progress events
//! - `worker`: runs one attempt of one batch
//! - `dispatcher`: bounded parallel execution with timeout and retry

pub mod batch;
pub mod dispatcher;
pub mod scratch;
pub mod task;
pub mod worker;

pub use batch::{Batch, plan_batches};
pub use dispatcher::{CancelFlag, DispatchReport, Dispatcher};
pub use scratch::Scratch;
pub use task::{AttemptRecord, DispatchEvent, TaskResult, TaskState};
pub use worker::{BatchWorker, WorkerDeps};
