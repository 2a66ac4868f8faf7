use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use riskroom::{JobStatus, OrchestratorConfig};
use riskroom::deliverables::{DashboardGenerator, DeliverableGenerator, MarkdownReportGenerator};
use riskroom::job::Orchestrator;
use riskroom::llm::{LlmConfig, LlmReasoningEngine, create_provider};
use riskroom::store::InMemoryContentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(corpus_path) = args.next().map(PathBuf::from) else {
        eprintln!("Usage: riskroom <corpus.json> [job name]");
        std::process::exit(2);
    };
    let job_name = args.next().unwrap_or_else(|| "Legal risk analysis".to_string());

    let config = OrchestratorConfig::from_env().context("invalid RISKROOM_* configuration")?;
    let llm_config = LlmConfig::from_env().context("LLM configuration")?;

    let store = InMemoryContentStore::from_json_file(&corpus_path)
        .await
        .with_context(|| format!("failed to load corpus from {}", corpus_path.display()))?;
    let document_ids = store.document_ids();

    eprintln!("riskroom v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Corpus: {} ({} documents)", store.name(), store.len());
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Output: {}", config.deliverables.output_dir.display());

    let llm = create_provider(&llm_config)?;
    let engine = Arc::new(LlmReasoningEngine::new(llm).with_max_tokens(llm_config.max_tokens));
    let generators: Vec<Arc<dyn DeliverableGenerator>> = vec![
        Arc::new(MarkdownReportGenerator::new()),
        Arc::new(DashboardGenerator::new()),
    ];

    let orchestrator = Orchestrator::new(Arc::new(store), engine, generators, config);
    let job_id = orchestrator.submit(document_ids, job_name).await?;

    let ctrl_c = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling job {job_id}...");
            if let Err(e) = ctrl_c.cancel(job_id).await {
                tracing::warn!(error = %e, "Cancel failed");
            }
        }
    });

    let status = orchestrator.wait(job_id).await?;
    let job = orchestrator.get_job(job_id).await?;

    eprintln!();
    eprintln!("Job {job_id}: {}", status.status);
    eprintln!("   Risks: {}", job.risk_count);
    for outcome in &job.deliverables {
        match &outcome.artifact {
            Some(artifact) => eprintln!("   {}: {}", outcome.generator, artifact.path.display()),
            None => eprintln!(
                "   {}: failed ({})",
                outcome.generator,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    for limitation in &job.limitations {
        eprintln!("   Limitation: {limitation}");
    }
    if let Some(error) = &status.error {
        eprintln!("   Error: {error}");
    }

    if matches!(status.status, JobStatus::Failed | JobStatus::Cancelled) {
        std::process::exit(1);
    }
    Ok(())
}
