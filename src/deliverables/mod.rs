//! Deliverable generation.
//!
//! Every configured generator runs concurrently against the same immutable
//! register, each under its own timeout. A generator failing never cancels or
//! blocks the others; the coordinator decides what the outcomes mean for the
//! job.

pub mod dashboard;
pub mod report;

pub use dashboard::DashboardGenerator;
pub use report::MarkdownReportGenerator;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::error::GeneratorError;
use crate::risk::RiskRegister;

/// Where a generator put its artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub generator: String,
    pub path: PathBuf,
    pub media_type: String,
    pub bytes: u64,
}

/// Job information a generator may render alongside the register.
#[derive(Debug, Clone)]
pub struct DeliverableContext {
    pub job_id: Uuid,
    pub job_name: String,
    pub document_ids: Vec<String>,
    pub output_dir: PathBuf,
    pub generated_at: DateTime<Utc>,
}

impl DeliverableContext {
    /// `<output_dir>/<job_id>_<suffix>`
    pub fn artifact_path(&self, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{}_{suffix}", self.job_id))
    }
}

/// Produces one deliverable from a finished register.
#[async_trait]
pub trait DeliverableGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        ctx: &DeliverableContext,
        register: &RiskRegister,
    ) -> Result<ArtifactRef, GeneratorError>;
}

/// Result of one generator run, recorded on the job.
#[derive(Debug, Clone, Serialize)]
pub struct DeliverableOutcome {
    pub generator: String,
    pub artifact: Option<ArtifactRef>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl DeliverableOutcome {
    pub fn succeeded(&self) -> bool {
        self.artifact.is_some()
    }
}

/// Run every generator concurrently. Outcomes come back in generator order.
pub async fn run_deliverables(
    generators: &[Arc<dyn DeliverableGenerator>],
    ctx: &DeliverableContext,
    register: Arc<RiskRegister>,
    timeout: Duration,
) -> Vec<DeliverableOutcome> {
    let runs = generators.iter().map(|generator| {
        let register = Arc::clone(&register);
        async move {
            let name = generator.name().to_string();
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, generator.generate(ctx, &register)).await {
                Ok(result) => result,
                Err(_) => Err(GeneratorError::Timeout {
                    generator: name.clone(),
                    after: timeout,
                }),
            };
            let elapsed = started.elapsed();

            match result {
                Ok(artifact) => {
                    tracing::info!(
                        job_id = %ctx.job_id,
                        generator = %name,
                        path = %artifact.path.display(),
                        "Deliverable generated"
                    );
                    DeliverableOutcome {
                        generator: name,
                        artifact: Some(artifact),
                        error: None,
                        elapsed,
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %ctx.job_id,
                        generator = %name,
                        error = %e,
                        "Deliverable generator failed"
                    );
                    DeliverableOutcome {
                        generator: name,
                        artifact: None,
                        error: Some(e.to_string()),
                        elapsed,
                    }
                }
            }
        }
    });
    join_all(runs).await
}

/// Write an artifact, creating the output directory if needed.
pub(crate) async fn write_artifact(
    generator: &str,
    path: PathBuf,
    media_type: &str,
    contents: &str,
) -> Result<ArtifactRef, GeneratorError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, contents).await?;
    Ok(ArtifactRef {
        generator: generator.to_string(),
        path,
        media_type: media_type.to_string(),
        bytes: contents.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl DeliverableGenerator for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(
            &self,
            _ctx: &DeliverableContext,
            _register: &RiskRegister,
        ) -> Result<ArtifactRef, GeneratorError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(GeneratorError::Failed {
                    generator: self.name.to_string(),
                    reason: "template missing".into(),
                });
            }
            Ok(ArtifactRef {
                generator: self.name.to_string(),
                path: PathBuf::from(format!("/tmp/{}", self.name)),
                media_type: "text/plain".into(),
                bytes: 0,
            })
        }
    }

    fn ctx() -> DeliverableContext {
        DeliverableContext {
            job_id: Uuid::new_v4(),
            job_name: "Acme".into(),
            document_ids: vec!["D1".into()],
            output_dir: PathBuf::from("/tmp"),
            generated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let generators: Vec<Arc<dyn DeliverableGenerator>> = vec![
            Arc::new(Fixed { name: "report", fail: true, delay: Duration::ZERO }),
            Arc::new(Fixed { name: "dashboard", fail: false, delay: Duration::from_millis(20) }),
        ];
        let outcomes = run_deliverables(
            &generators,
            &ctx(),
            Arc::new(RiskRegister::default()),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].generator, "report");
        assert!(!outcomes[0].succeeded());
        assert!(outcomes[0].error.as_deref().unwrap().contains("template missing"));
        assert!(outcomes[1].succeeded());
    }

    #[tokio::test]
    async fn slow_generator_times_out() {
        let generators: Vec<Arc<dyn DeliverableGenerator>> = vec![Arc::new(Fixed {
            name: "slow",
            fail: false,
            delay: Duration::from_secs(30),
        })];
        let outcomes = run_deliverables(
            &generators,
            &ctx(),
            Arc::new(RiskRegister::default()),
            Duration::from_millis(50),
        )
        .await;
        assert!(outcomes[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[test]
    fn artifact_path_uses_job_id() {
        let ctx = ctx();
        let path = ctx.artifact_path("report.md");
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("{}_report.md", ctx.job_id)
        );
    }
}
