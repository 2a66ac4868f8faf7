//! Dispatcher: runs every batch of a job on a bounded worker pool.
//!
//! Tasks wait on a semaphore for a slot, so at most `max_parallel` run at
//! once. Each attempt is wrapped in a timeout; timeouts and transient errors
//! are retried with exponential backoff and jitter, fatal errors are not.
//! `dispatch` returns once every task is terminal.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, WorkerError};
use crate::llm::ReasoningEngine;
use crate::risk::{FindingSet, UnanalyzedBatch};
use crate::store::ContentStore;
use crate::worker::batch::Batch;
use crate::worker::scratch::Scratch;
use crate::worker::task::{AttemptRecord, DispatchEvent, TaskResult, TaskState};
use crate::worker::worker::{BatchWorker, WorkerDeps};

/// Cooperative cancellation flag shared between a job and its tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal results of every task, keyed by task id.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub results: HashMap<Uuid, TaskResult>,
}

impl DispatchReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// Findings of the successful tasks, in task order.
    pub fn finding_sets(&self) -> Vec<FindingSet> {
        let mut sets: Vec<FindingSet> = self
            .results
            .values()
            .filter_map(|r| r.findings.clone())
            .collect();
        sets.sort_by_key(|s| s.sequence);
        sets
    }

    /// Batches that never produced findings, in task order.
    pub fn unanalyzed(&self) -> Vec<UnanalyzedBatch> {
        let mut batches: Vec<UnanalyzedBatch> = self
            .results
            .values()
            .filter(|r| !r.succeeded())
            .map(|r| UnanalyzedBatch {
                sequence: r.sequence,
                document_ids: r.document_ids.clone(),
                reason: describe_failure(r),
            })
            .collect();
        batches.sort_by_key(|b| b.sequence);
        batches
    }
}

fn describe_failure(result: &TaskResult) -> String {
    let error = result.error.as_deref().unwrap_or("no result");
    format!(
        "{} after {} attempt(s): {}",
        result.state,
        result.attempt_count(),
        error
    )
}

/// Fans batches out to workers and collects their results.
pub struct Dispatcher {
    deps: WorkerDeps,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ContentStore>,
        engine: Arc<dyn ReasoningEngine>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            deps: WorkerDeps {
                store,
                engine,
                config: Arc::new(config),
            },
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.deps.config
    }

    /// Run every batch to a terminal state.
    ///
    /// Fails only when the plan is empty or no task succeeded; individual
    /// task failures are reported in the returned map.
    pub async fn dispatch(
        &self,
        job_id: Uuid,
        batches: Vec<Batch>,
        cancel: &CancelFlag,
        events: Option<mpsc::UnboundedSender<DispatchEvent>>,
    ) -> Result<DispatchReport, DispatchError> {
        if batches.is_empty() {
            return Err(DispatchError::EmptyPlan);
        }

        let total = batches.len();
        info!(
            job_id = %job_id,
            tasks = total,
            max_parallel = self.config().max_parallel,
            "Dispatching batches"
        );

        let semaphore = Arc::new(Semaphore::new(self.config().max_parallel.max(1)));
        let mut pending: HashMap<Uuid, Batch> = HashMap::with_capacity(total);
        let mut join_set = JoinSet::new();

        for batch in batches {
            let task_id = Uuid::new_v4();
            pending.insert(task_id, batch.clone());

            let deps = self.deps.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let events = events.clone();
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return abandoned(task_id, &batch, "worker pool closed");
                };
                run_task(deps, job_id, task_id, batch, &cancel, events.as_ref()).await
            });
        }

        let mut report = DispatchReport::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => {
                    pending.remove(&result.task_id);
                    report.results.insert(result.task_id, result);
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "Dispatched task aborted"),
            }
        }
        // Anything left panicked before producing a result.
        for (task_id, batch) in pending {
            let result = abandoned(task_id, &batch, "task panicked");
            emit(
                events.as_ref(),
                DispatchEvent::TaskFinished {
                    task_id,
                    sequence: batch.sequence,
                    state: result.state,
                },
            );
            report.results.insert(task_id, result);
        }

        info!(
            job_id = %job_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Dispatch complete"
        );

        if report.succeeded() == 0 {
            let unanalyzed = report.unanalyzed();
            let summary = unanalyzed
                .iter()
                .map(|b| {
                    format!(
                        "batch {} ({}): {}",
                        b.sequence + 1,
                        b.document_ids.join(", "),
                        b.reason
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DispatchError::NoSuccessfulTasks {
                failed: report.len(),
                summary,
                unanalyzed,
            });
        }
        Ok(report)
    }
}

fn emit(events: Option<&mpsc::UnboundedSender<DispatchEvent>>, event: DispatchEvent) {
    if let Some(tx) = events {
        // Receiver gone just means nobody is watching progress.
        let _ = tx.send(event);
    }
}

fn abandoned(task_id: Uuid, batch: &Batch, reason: &str) -> TaskResult {
    TaskResult {
        task_id,
        sequence: batch.sequence,
        document_ids: batch.document_ids.clone(),
        state: TaskState::Failed,
        attempts: Vec::new(),
        findings: None,
        error: Some(reason.to_string()),
        elapsed: Duration::ZERO,
    }
}

async fn run_task(
    deps: WorkerDeps,
    job_id: Uuid,
    task_id: Uuid,
    batch: Batch,
    cancel: &CancelFlag,
    events: Option<&mpsc::UnboundedSender<DispatchEvent>>,
) -> TaskResult {
    let started = Instant::now();
    let sequence = batch.sequence;
    let config = Arc::clone(&deps.config);

    if cancel.is_cancelled() {
        let result = abandoned(task_id, &batch, "cancelled before start");
        emit(
            events,
            DispatchEvent::TaskFinished {
                task_id,
                sequence,
                state: result.state,
            },
        );
        return result;
    }

    let document_ids = batch.document_ids.clone();
    let worker = BatchWorker::new(job_id, task_id, batch, deps);
    let mut scratch = Scratch::new(task_id);
    let mut attempts = Vec::new();
    let mut last_error: Option<WorkerError> = None;
    let mut findings = None;

    for attempt in 1..=config.max_retries.saturating_add(1) {
        if attempt > 1 {
            if cancel.is_cancelled() {
                break;
            }
            let delay = backoff_delay(&config, attempt - 1);
            tracing::debug!(
                task_id = %task_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying batch"
            );
            tokio::time::sleep(delay).await;
        }

        scratch.begin_attempt(attempt);
        emit(
            events,
            DispatchEvent::TaskStarted {
                task_id,
                sequence,
                attempt,
            },
        );

        let record = AttemptRecord::new(attempt);
        let attempt_start = Instant::now();
        let run = tokio::time::timeout(config.task_timeout, worker.run(&mut scratch));
        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(_) => Err(WorkerError::Timeout {
                after: config.task_timeout,
            }),
        };

        match outcome {
            Ok(set) => {
                attempts.push(record.succeed(attempt_start.elapsed()));
                findings = Some(set);
                last_error = None;
                break;
            }
            Err(e) => {
                warn!(
                    job_id = %job_id,
                    task_id = %task_id,
                    attempt,
                    error = %e,
                    "Batch attempt failed"
                );
                attempts.push(record.fail(e.to_string(), attempt_start.elapsed()));
                let retryable = e.is_retryable();
                last_error = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }

    let state = match (&findings, &last_error) {
        (Some(_), _) => TaskState::Succeeded,
        (None, Some(WorkerError::Timeout { .. })) => TaskState::TimedOut,
        (None, _) => TaskState::Failed,
    };
    let error = match (&findings, last_error) {
        (Some(_), _) => None,
        (None, Some(e)) => Some(e.to_string()),
        (None, None) => Some("cancelled before retry".to_string()),
    };

    emit(
        events,
        DispatchEvent::TaskFinished {
            task_id,
            sequence,
            state,
        },
    );

    TaskResult {
        task_id,
        sequence,
        document_ids,
        state,
        attempts,
        findings,
        error,
        elapsed: started.elapsed(),
    }
}

/// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped
/// at `retry_max_delay`, plus up to 25% jitter.
pub fn backoff_delay(config: &DispatchConfig, retry: u32) -> Duration {
    let exp = retry.saturating_sub(1).min(16);
    let base = config
        .retry_base_delay
        .saturating_mul(1u32 << exp)
        .min(config.retry_max_delay);
    let jitter = rand::thread_rng().gen_range(0.0..=0.25);
    base + base.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ReasoningError;
    use crate::llm::{AnalysisBatch, AnalysisContext};
    use crate::risk::{Category, Evidence, Likelihood, RawFinding, Severity};
    use crate::store::{Document, InMemoryContentStore, Page};

    fn corpus(n: usize) -> Arc<InMemoryContentStore> {
        let docs = (1..=n).map(|i| Document {
            doc_id: format!("D{i}"),
            title: None,
            summary: format!("Document {i}"),
            pages: vec![Page {
                page_num: 1,
                summary: "Limitation of liability".into(),
                content_ref: format!("d{i}/p1"),
                text: None,
            }],
        });
        Arc::new(InMemoryContentStore::new("test", docs).unwrap())
    }

    fn config() -> DispatchConfig {
        DispatchConfig {
            min_batch: 1,
            max_batch: 1,
            max_parallel: 2,
            max_retries: 2,
            task_timeout: Duration::from_secs(5),
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
            ..DispatchConfig::default()
        }
    }

    fn batches(n: usize) -> Vec<Batch> {
        (0..n)
            .map(|i| Batch {
                sequence: i,
                document_ids: vec![format!("D{}", i + 1)],
            })
            .collect()
    }

    fn finding_for(doc: &str) -> RawFinding {
        RawFinding {
            local_id: None,
            title: format!("Risk in {doc}"),
            description: String::new(),
            category: Category::Contractual,
            severity: Severity::Medium,
            likelihood: Likelihood::Possible,
            evidence: vec![Evidence {
                doc_id: doc.into(),
                page_num: 1,
                citation: "p1".into(),
            }],
            legal_basis: String::new(),
            mitigation: String::new(),
        }
    }

    /// Behavior per document id; default is one finding citing the document.
    #[derive(Default)]
    struct ScriptedEngine {
        /// Fail this many calls with a transient error before succeeding.
        transient_failures: Mutex<HashMap<String, u32>>,
        fatal: Vec<String>,
        slow: Vec<String>,
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ReasoningEngine for ScriptedEngine {
        async fn analyze(
            &self,
            batch: &AnalysisBatch,
            _ctx: &AnalysisContext,
        ) -> Result<Vec<RawFinding>, ReasoningError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let doc = batch.documents[0].doc_id.clone();
            if self.slow.contains(&doc) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fatal.contains(&doc) {
                return Err(ReasoningError::Schema("missing risks".into()));
            }
            {
                let mut left = self.transient_failures.lock().unwrap();
                if let Some(n) = left.get_mut(&doc) {
                    if *n > 0 {
                        *n -= 1;
                        return Err(ReasoningError::Transient("503".into()));
                    }
                }
            }
            Ok(vec![finding_for(&doc)])
        }
    }

    #[tokio::test]
    async fn runs_all_batches_within_parallel_limit() {
        let engine = Arc::new(ScriptedEngine::default());
        let dispatcher = Dispatcher::new(corpus(6), engine.clone(), config());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = dispatcher
            .dispatch(Uuid::new_v4(), batches(6), &CancelFlag::new(), Some(tx))
            .await
            .unwrap();

        assert_eq!(report.len(), 6);
        assert_eq!(report.succeeded(), 6);
        assert!(engine.peak.load(Ordering::SeqCst) <= 2);

        let sets = report.finding_sets();
        let order: Vec<usize> = sets.iter().map(|s| s.sequence).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);

        let mut finished = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, DispatchEvent::TaskFinished { .. }) {
                finished += 1;
            }
        }
        assert_eq!(finished, 6);
    }

    #[tokio::test]
    async fn transient_errors_retried() {
        let engine = Arc::new(ScriptedEngine::default());
        engine
            .transient_failures
            .lock()
            .unwrap()
            .insert("D1".into(), 2);
        let dispatcher = Dispatcher::new(corpus(1), engine.clone(), config());

        let report = dispatcher
            .dispatch(Uuid::new_v4(), batches(1), &CancelFlag::new(), None)
            .await
            .unwrap();

        let result = report.results.values().next().unwrap();
        assert_eq!(result.state, TaskState::Succeeded);
        assert_eq!(result.attempt_count(), 3);
        assert!(result.attempts[0].error.as_deref().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn fatal_errors_not_retried() {
        let engine = Arc::new(ScriptedEngine {
            fatal: vec!["D2".into()],
            ..ScriptedEngine::default()
        });
        let dispatcher = Dispatcher::new(corpus(2), engine.clone(), config());

        let report = dispatcher
            .dispatch(Uuid::new_v4(), batches(2), &CancelFlag::new(), None)
            .await
            .unwrap();

        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        let unanalyzed = report.unanalyzed();
        assert_eq!(unanalyzed.len(), 1);
        assert_eq!(unanalyzed[0].document_ids, vec!["D2"]);
        assert!(unanalyzed[0].reason.starts_with("failed after 1 attempt(s)"));
    }

    #[tokio::test]
    async fn timeouts_exhaust_retries() {
        let engine = Arc::new(ScriptedEngine {
            slow: vec!["D3".into()],
            ..ScriptedEngine::default()
        });
        let config = DispatchConfig {
            task_timeout: Duration::from_millis(100),
            max_retries: 1,
            ..config()
        };
        let dispatcher = Dispatcher::new(corpus(3), engine, config);

        let report = dispatcher
            .dispatch(Uuid::new_v4(), batches(3), &CancelFlag::new(), None)
            .await
            .unwrap();

        let timed_out: Vec<&TaskResult> = report
            .results
            .values()
            .filter(|r| r.state == TaskState::TimedOut)
            .collect();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].document_ids, vec!["D3"]);
        assert_eq!(timed_out[0].attempt_count(), 2);
        assert_eq!(report.succeeded(), 2);
    }

    #[tokio::test]
    async fn zero_successes_is_an_error() {
        let engine = Arc::new(ScriptedEngine {
            fatal: vec!["D1".into(), "D2".into()],
            ..ScriptedEngine::default()
        });
        let dispatcher = Dispatcher::new(corpus(2), engine, config());

        let err = dispatcher
            .dispatch(Uuid::new_v4(), batches(2), &CancelFlag::new(), None)
            .await
            .unwrap_err();
        match err {
            DispatchError::NoSuccessfulTasks { failed, unanalyzed, .. } => {
                assert_eq!(failed, 2);
                let docs: Vec<Vec<String>> =
                    unanalyzed.into_iter().map(|b| b.document_ids).collect();
                assert_eq!(docs, vec![vec!["D1".to_string()], vec!["D2".to_string()]]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_flag_stops_unstarted_tasks() {
        let engine = Arc::new(ScriptedEngine::default());
        let dispatcher = Dispatcher::new(corpus(3), engine.clone(), config());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = dispatcher
            .dispatch(Uuid::new_v4(), batches(3), &cancel, None)
            .await;
        assert!(result.is_err());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_plan_rejected() {
        let dispatcher = Dispatcher::new(corpus(1), Arc::new(ScriptedEngine::default()), config());
        let err = dispatcher
            .dispatch(Uuid::new_v4(), vec![], &CancelFlag::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::EmptyPlan));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = DispatchConfig {
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_millis(300),
            ..DispatchConfig::default()
        };
        let first = backoff_delay(&config, 1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let second = backoff_delay(&config, 2);
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(250));
        let capped = backoff_delay(&config, 10);
        assert!(capped >= Duration::from_millis(300) && capped <= Duration::from_millis(375));
    }
}
