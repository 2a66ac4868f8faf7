//! End-to-end job runs against stub collaborators.
//!
//! The content store is the real in-memory store; the reasoning engine and
//! some generators are stubs so failures can be scripted per document.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::timeout;

use riskroom::config::OrchestratorConfig;
use riskroom::deliverables::{
    ArtifactRef, DashboardGenerator, DeliverableContext, DeliverableGenerator,
    MarkdownReportGenerator,
};
use riskroom::error::{Error, GeneratorError, ReasoningError, ValidationError};
use riskroom::job::{CancelAck, JobRequest, JobStatus, Orchestrator};
use riskroom::llm::{AnalysisBatch, AnalysisContext, ReasoningEngine};
use riskroom::risk::{Category, Evidence, Likelihood, RawFinding, RiskRegister, Severity};
use riskroom::store::{Document, InMemoryContentStore, Page};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What the stub engine does when a batch contains a given document.
#[derive(Clone, Copy)]
enum Behavior {
    /// Never answers within the task timeout.
    Hang,
    /// Cites a document outside the batch.
    Stray,
}

/// Reasoning engine stub: one finding per document, titled after it.
#[derive(Default)]
struct StubEngine {
    scripted: Vec<(&'static str, Behavior)>,
    /// Titles to use instead of the per-document default.
    titles: Vec<(&'static str, &'static str)>,
    started: Option<Arc<Notify>>,
    delay: Duration,
    /// Document ids of every batch seen.
    batches: Mutex<Vec<Vec<String>>>,
}

impl StubEngine {
    fn behavior(&self, batch: &AnalysisBatch) -> Option<Behavior> {
        batch.documents.iter().find_map(|doc| {
            self.scripted
                .iter()
                .find(|(id, _)| *id == doc.doc_id)
                .map(|(_, b)| *b)
        })
    }

    fn title_for(&self, doc_id: &str) -> String {
        self.titles
            .iter()
            .find(|(id, _)| *id == doc_id)
            .map(|(_, t)| t.to_string())
            .unwrap_or_else(|| format!("Unfavourable terms in {doc_id}"))
    }
}

#[async_trait]
impl ReasoningEngine for StubEngine {
    async fn analyze(
        &self,
        batch: &AnalysisBatch,
        _ctx: &AnalysisContext,
    ) -> Result<Vec<RawFinding>, ReasoningError> {
        self.batches.lock().unwrap().push(
            batch.documents.iter().map(|d| d.doc_id.clone()).collect(),
        );
        if let Some(started) = &self.started {
            started.notify_one();
        }
        tokio::time::sleep(self.delay).await;

        match self.behavior(batch) {
            Some(Behavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![])
            }
            Some(Behavior::Stray) => Ok(vec![finding("Misfiled exhibit", "D99")]),
            None => Ok(batch
                .documents
                .iter()
                .map(|doc| finding(&self.title_for(&doc.doc_id), &doc.doc_id))
                .collect()),
        }
    }
}

fn finding(title: &str, doc_id: &str) -> RawFinding {
    RawFinding {
        local_id: None,
        title: title.to_string(),
        description: format!("Found while reviewing {doc_id}"),
        category: Category::Contractual,
        severity: Severity::High,
        likelihood: Likelihood::Possible,
        evidence: vec![Evidence {
            doc_id: doc_id.to_string(),
            page_num: 1,
            citation: "Clause 9".into(),
        }],
        legal_basis: "Contract law".into(),
        mitigation: "Renegotiate".into(),
    }
}

/// Generator that always fails under a given name.
struct FailingGenerator(&'static str);

#[async_trait]
impl DeliverableGenerator for FailingGenerator {
    fn name(&self) -> &str {
        self.0
    }

    async fn generate(
        &self,
        _ctx: &DeliverableContext,
        _register: &RiskRegister,
    ) -> Result<ArtifactRef, GeneratorError> {
        Err(GeneratorError::Failed {
            generator: self.0.to_string(),
            reason: "renderer crashed".into(),
        })
    }
}

fn store(ids: &[&str]) -> Arc<InMemoryContentStore> {
    let docs: Vec<Document> = ids
        .iter()
        .map(|id| Document {
            doc_id: id.to_string(),
            title: Some(format!("Agreement {id}")),
            summary: format!("Commercial agreement {id}"),
            pages: vec![
                Page {
                    page_num: 1,
                    summary: "Limitation of liability".into(),
                    content_ref: format!("{id}/1"),
                    text: Some("Liability is uncapped.".into()),
                },
                Page {
                    page_num: 2,
                    summary: "Signatures".into(),
                    content_ref: format!("{id}/2"),
                    text: None,
                },
            ],
        })
        .collect();
    Arc::new(InMemoryContentStore::new("Test Room", docs).unwrap())
}

fn config(output_dir: &std::path::Path) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.dispatch.min_batch = 1;
    config.dispatch.max_batch = 1;
    config.dispatch.max_parallel = 2;
    config.dispatch.max_retries = 1;
    config.dispatch.task_timeout = Duration::from_millis(200);
    config.dispatch.retry_base_delay = Duration::from_millis(1);
    config.dispatch.retry_max_delay = Duration::from_millis(5);
    config.deliverables.output_dir = output_dir.to_path_buf();
    config.deliverables.generator_timeout = Duration::from_secs(2);
    config
}

fn real_generators() -> Vec<Arc<dyn DeliverableGenerator>> {
    vec![
        Arc::new(MarkdownReportGenerator::new()),
        Arc::new(DashboardGenerator::new()),
    ]
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn full_run_writes_both_deliverables() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        store(&["D1", "D2"]),
        Arc::new(StubEngine::default()),
        real_generators(),
        config(dir.path()),
    );

    let job_id = orchestrator.submit(ids(&["D1", "D2"]), "Acme").await.unwrap();
    let view = timeout(TEST_TIMEOUT, orchestrator.wait(job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.progress, 100);
    assert!(view.error.is_none());

    let job = orchestrator.get_job(job_id).await.unwrap();
    assert_eq!(job.total_tasks, 2);
    assert_eq!(job.finished_tasks, 2);
    assert_eq!(job.risk_count, 2);
    assert_eq!(job.deliverables.len(), 2);
    for outcome in &job.deliverables {
        let artifact = outcome.artifact.as_ref().unwrap();
        assert!(artifact.path.starts_with(dir.path()));
        assert!(artifact.path.exists());
    }

    let seen: Vec<JobStatus> = job.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        seen,
        vec![
            JobStatus::Planning,
            JobStatus::Dispatching,
            JobStatus::Analyzing,
            JobStatus::Integrating,
            JobStatus::GeneratingDeliverables,
            JobStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn timed_out_document_becomes_limitation() {
    let dir = tempfile::tempdir().unwrap();
    let engine = StubEngine {
        scripted: vec![("D3", Behavior::Hang)],
        ..StubEngine::default()
    };
    let orchestrator = Orchestrator::new(
        store(&["D1", "D2", "D3"]),
        Arc::new(engine),
        real_generators(),
        config(dir.path()),
    );

    let job_id = orchestrator
        .submit(ids(&["D1", "D2", "D3"]), "Acme")
        .await
        .unwrap();
    let view = timeout(TEST_TIMEOUT, orchestrator.wait(job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(view.status, JobStatus::CompletedWithWarnings);
    let job = orchestrator.get_job(job_id).await.unwrap();
    assert!(job.limitations.iter().any(|l| l.contains("D3")));
    assert!(job.error.as_deref().unwrap().contains("1 of 3 batches"));

    let risks = orchestrator.get_risks(job_id, None, None).await.unwrap();
    assert_eq!(risks.len(), 2);
    for risk in &risks {
        assert!(!risk.cites_document("D3"));
    }
}

#[tokio::test]
async fn one_failed_generator_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let generators: Vec<Arc<dyn DeliverableGenerator>> = vec![
        Arc::new(FailingGenerator("report")),
        Arc::new(DashboardGenerator::new()),
    ];
    let orchestrator = Orchestrator::new(
        store(&["D1"]),
        Arc::new(StubEngine::default()),
        generators,
        config(dir.path()),
    );

    let job_id = orchestrator.submit(ids(&["D1"]), "Acme").await.unwrap();
    let view = timeout(TEST_TIMEOUT, orchestrator.wait(job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(view.status, JobStatus::Completed);
    let job = orchestrator.get_job(job_id).await.unwrap();
    let report = job.deliverables.iter().find(|o| o.generator == "report").unwrap();
    assert!(report.artifact.is_none());
    assert!(report.error.as_deref().unwrap().contains("renderer crashed"));
    let dashboard = job.deliverables.iter().find(|o| o.generator == "dashboard").unwrap();
    assert!(dashboard.artifact.is_some());
    assert!(
        job.limitations
            .iter()
            .any(|l| l.starts_with("Deliverable report not produced"))
    );
    assert_eq!(orchestrator.get_risks(job_id, None, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn warn_on_partial_downgrades_to_warnings() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.deliverables.warn_on_partial = true;
    let generators: Vec<Arc<dyn DeliverableGenerator>> = vec![
        Arc::new(FailingGenerator("report")),
        Arc::new(DashboardGenerator::new()),
    ];
    let orchestrator = Orchestrator::new(
        store(&["D1"]),
        Arc::new(StubEngine::default()),
        generators,
        config,
    );

    let job_id = orchestrator.submit(ids(&["D1"]), "Acme").await.unwrap();
    let view = timeout(TEST_TIMEOUT, orchestrator.wait(job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, JobStatus::CompletedWithWarnings);
}

#[tokio::test]
async fn require_all_fails_on_any_generator_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.deliverables.require_all = true;
    let generators: Vec<Arc<dyn DeliverableGenerator>> = vec![
        Arc::new(MarkdownReportGenerator::new()),
        Arc::new(FailingGenerator("dashboard")),
    ];
    let orchestrator = Orchestrator::new(
        store(&["D1"]),
        Arc::new(StubEngine::default()),
        generators,
        config,
    );

    let job_id = orchestrator.submit(ids(&["D1"]), "Acme").await.unwrap();
    let view = timeout(TEST_TIMEOUT, orchestrator.wait(job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.error.as_deref().unwrap().contains("dashboard"));
    assert!(orchestrator.get_risks(job_id, None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn every_generator_failing_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let generators: Vec<Arc<dyn DeliverableGenerator>> = vec![
        Arc::new(FailingGenerator("report")),
        Arc::new(FailingGenerator("dashboard")),
    ];
    let orchestrator = Orchestrator::new(
        store(&["D1"]),
        Arc::new(StubEngine::default()),
        generators,
        config(dir.path()),
    );

    let job_id = orchestrator.submit(ids(&["D1"]), "Acme").await.unwrap();
    let view = timeout(TEST_TIMEOUT, orchestrator.wait(job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, JobStatus::Failed);
}

#[tokio::test]
async fn every_batch_failing_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let engine = StubEngine {
        scripted: vec![("D1", Behavior::Hang), ("D2", Behavior::Hang)],
        ..StubEngine::default()
    };
    let orchestrator = Orchestrator::new(
        store(&["D1", "D2"]),
        Arc::new(engine),
        real_generators(),
        config(dir.path()),
    );

    let job_id = orchestrator.submit(ids(&["D1", "D2"]), "Acme").await.unwrap();
    let view = timeout(TEST_TIMEOUT, orchestrator.wait(job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.error.is_some());
    let job = orchestrator.get_job(job_id).await.unwrap();
    assert!(job.deliverables.is_empty());
    assert_eq!(job.limitations.len(), 2);
    assert!(job.limitations[0].starts_with("Documents not analyzed: D1 (batch 1:"));
    assert!(job.limitations[1].starts_with("Documents not analyzed: D2 (batch 2:"));
}

#[tokio::test]
async fn cancel_while_analyzing() {
    let dir = tempfile::tempdir().unwrap();
    let started = Arc::new(Notify::new());
    let engine = StubEngine {
        started: Some(Arc::clone(&started)),
        delay: Duration::from_millis(100),
        ..StubEngine::default()
    };
    let mut config = config(dir.path());
    config.dispatch.max_parallel = 1;
    config.dispatch.task_timeout = Duration::from_secs(5);
    let orchestrator = Orchestrator::new(
        store(&["D1", "D2", "D3"]),
        Arc::new(engine),
        real_generators(),
        config,
    );

    let job_id = orchestrator
        .submit(ids(&["D1", "D2", "D3"]), "Acme")
        .await
        .unwrap();
    timeout(TEST_TIMEOUT, started.notified()).await.unwrap();
    assert_eq!(
        orchestrator.cancel(job_id).await.unwrap(),
        CancelAck::Requested
    );

    let view = timeout(TEST_TIMEOUT, orchestrator.wait(job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, JobStatus::Cancelled);
    assert!(orchestrator.get_risks(job_id, None, None).await.unwrap().is_empty());

    let job = orchestrator.get_job(job_id).await.unwrap();
    assert!(job.transitions.iter().all(|t| t.to != JobStatus::Integrating));
    assert!(job.deliverables.is_empty());
}

#[tokio::test]
async fn stray_citation_rejected_and_evidence_stays_in_job() {
    let dir = tempfile::tempdir().unwrap();
    let engine = StubEngine {
        scripted: vec![("D2", Behavior::Stray)],
        ..StubEngine::default()
    };
    let orchestrator = Orchestrator::new(
        store(&["D1", "D2", "D3"]),
        Arc::new(engine),
        real_generators(),
        config(dir.path()),
    );

    let documents = ids(&["D1", "D2", "D3"]);
    let job_id = orchestrator.submit(documents.clone(), "Acme").await.unwrap();
    let view = timeout(TEST_TIMEOUT, orchestrator.wait(job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(view.status, JobStatus::CompletedWithWarnings);
    let allowed: HashSet<&str> = documents.iter().map(String::as_str).collect();
    for risk in orchestrator.get_risks(job_id, None, None).await.unwrap() {
        for evidence in &risk.evidence {
            assert!(allowed.contains(evidence.doc_id.as_str()));
        }
    }
    let job = orchestrator.get_job(job_id).await.unwrap();
    assert!(job.limitations.iter().any(|l| l.contains("D2")));
}

#[tokio::test]
async fn same_risk_in_two_batches_is_merged() {
    let dir = tempfile::tempdir().unwrap();
    let engine = StubEngine {
        titles: vec![
            ("D1", "Change of control termination right"),
            ("D2", "Change of control termination right"),
        ],
        ..StubEngine::default()
    };
    let orchestrator = Orchestrator::new(
        store(&["D1", "D2"]),
        Arc::new(engine),
        real_generators(),
        config(dir.path()),
    );

    let job_id = orchestrator.submit(ids(&["D1", "D2"]), "Acme").await.unwrap();
    timeout(TEST_TIMEOUT, orchestrator.wait(job_id))
        .await
        .unwrap()
        .unwrap();

    let risks = orchestrator.get_risks(job_id, None, None).await.unwrap();
    assert_eq!(risks.len(), 1);
    assert!(risks[0].cites_document("D1"));
    assert!(risks[0].cites_document("D2"));

    let filtered = orchestrator
        .get_risks(job_id, Some(Category::Regulatory), None)
        .await
        .unwrap();
    assert!(filtered.is_empty());
    let high = orchestrator
        .get_risks(job_id, None, Some(Severity::High))
        .await
        .unwrap();
    assert_eq!(high.len(), 1);
}

#[tokio::test]
async fn related_documents_share_a_batch() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(StubEngine::default());
    let mut config = config(dir.path());
    config.dispatch.max_batch = 2;
    let orchestrator = Orchestrator::new(
        store(&["D1", "D2", "D3"]),
        engine.clone(),
        real_generators(),
        config,
    );

    let job_id = orchestrator
        .submit_request(JobRequest {
            name: "Acme".into(),
            document_ids: ids(&["D1", "D2", "D3"]),
            related_groups: vec![ids(&["D1", "D3"])],
        })
        .await
        .unwrap();
    timeout(TEST_TIMEOUT, orchestrator.wait(job_id))
        .await
        .unwrap()
        .unwrap();

    let mut batches = engine.batches.lock().unwrap().clone();
    batches.sort();
    assert_eq!(batches, vec![ids(&["D1", "D3"]), ids(&["D2"])]);
}

#[tokio::test]
async fn unknown_documents_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        store(&["D1"]),
        Arc::new(StubEngine::default()),
        real_generators(),
        config(dir.path()),
    );

    let err = orchestrator
        .submit(ids(&["D1", "D404"]), "Acme")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::UnknownDocuments { ref ids }) if ids == &["D404"]
    ));
    assert_eq!(orchestrator.summary().await.total, 0);
}
