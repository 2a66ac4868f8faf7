//! Configuration types.
//!
//! Every struct has a `Default` and can be overlaid from `RISKROOM_*`
//! environment variables. Parsing goes through a lookup closure so it can be
//! exercised without touching the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Highest accepted `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 20;

/// Batching, concurrency and retry settings for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Smallest batch the planner will try to produce.
    pub min_batch: usize,
    /// Largest batch handed to one task.
    pub max_batch: usize,
    /// Maximum tasks running at once.
    pub max_parallel: usize,
    /// Retries after the first attempt (timeouts and transient errors only).
    pub max_retries: u32,
    /// Wall-clock limit for one task attempt.
    pub task_timeout: Duration,
    /// First retry delay; doubles on each further retry.
    pub retry_base_delay: Duration,
    /// Upper bound on any single retry delay.
    pub retry_max_delay: Duration,
    /// Pages pulled per document at most.
    pub max_pages_per_doc: usize,
    /// Terms that make a page worth fetching in full.
    pub focus_terms: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_batch: 3,
            max_batch: 10,
            max_parallel: 5,
            max_retries: 3,
            task_timeout: Duration::from_secs(300),
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            max_pages_per_doc: 8,
            focus_terms: [
                "liability",
                "indemn",
                "terminat",
                "warrant",
                "breach",
                "penalt",
                "governing law",
                "arbitration",
                "dispute",
                "litigation",
                "confidential",
                "intellectual property",
                "license",
                "data protection",
                "privacy",
                "compliance",
                "change of control",
                "exclusiv",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Duplicate-detection settings for the integration engine.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConfig {
    /// Title similarity at or above which two findings are merged.
    pub similarity_threshold: f64,
    /// Similarity at or above which (but below the threshold) a pair is
    /// flagged as ambiguous and kept separate.
    pub ambiguous_floor: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            ambiguous_floor: 0.60,
        }
    }
}

/// Deliverable fan-out policy.
#[derive(Debug, Clone)]
pub struct DeliverableConfig {
    /// Every generator must succeed or the job fails.
    pub require_all: bool,
    /// A partial generator failure downgrades the job to
    /// `completed_with_warnings` instead of `completed`.
    pub warn_on_partial: bool,
    /// Timeout for one generator run.
    pub generator_timeout: Duration,
    /// Where the bundled generators write their artifacts.
    pub output_dir: PathBuf,
}

impl Default for DeliverableConfig {
    fn default() -> Self {
        Self {
            require_all: false,
            warn_on_partial: false,
            generator_timeout: Duration::from_secs(120),
            output_dir: PathBuf::from("./output"),
        }
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub dispatch: DispatchConfig,
    pub merge: MergeConfig,
    pub deliverables: DeliverableConfig,
    /// Maximum jobs that may be non-terminal at once.
    pub max_active_jobs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            merge: MergeConfig::default(),
            deliverables: DeliverableConfig::default(),
            max_active_jobs: 10,
        }
    }
}

impl OrchestratorConfig {
    /// Build from process environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup over the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let d = &mut config.dispatch;

        d.min_batch = parse_or(&lookup, "RISKROOM_MIN_BATCH", d.min_batch)?;
        d.max_batch = parse_or(&lookup, "RISKROOM_MAX_BATCH", d.max_batch)?;
        d.max_parallel = parse_or(&lookup, "RISKROOM_MAX_PARALLEL", d.max_parallel)?;
        d.max_retries = parse_or(&lookup, "RISKROOM_MAX_RETRIES", d.max_retries)?;
        d.task_timeout = Duration::from_secs(parse_or(
            &lookup,
            "RISKROOM_TASK_TIMEOUT_SECS",
            d.task_timeout.as_secs(),
        )?);
        d.retry_base_delay = Duration::from_millis(parse_or(
            &lookup,
            "RISKROOM_RETRY_BASE_MS",
            d.retry_base_delay.as_millis() as u64,
        )?);
        d.max_pages_per_doc =
            parse_or(&lookup, "RISKROOM_MAX_PAGES_PER_DOC", d.max_pages_per_doc)?;

        let m = &mut config.merge;
        m.similarity_threshold = parse_or(
            &lookup,
            "RISKROOM_SIMILARITY_THRESHOLD",
            m.similarity_threshold,
        )?;
        m.ambiguous_floor = parse_or(&lookup, "RISKROOM_AMBIGUOUS_FLOOR", m.ambiguous_floor)?;

        let g = &mut config.deliverables;
        g.require_all = parse_or(&lookup, "RISKROOM_REQUIRE_ALL_DELIVERABLES", g.require_all)?;
        g.warn_on_partial = parse_or(&lookup, "RISKROOM_WARN_ON_PARTIAL", g.warn_on_partial)?;
        g.generator_timeout = Duration::from_secs(parse_or(
            &lookup,
            "RISKROOM_GENERATOR_TIMEOUT_SECS",
            g.generator_timeout.as_secs(),
        )?);
        if let Some(dir) = lookup("RISKROOM_OUTPUT_DIR") {
            g.output_dir = PathBuf::from(dir);
        }

        config.max_active_jobs =
            parse_or(&lookup, "RISKROOM_MAX_ACTIVE_JOBS", config.max_active_jobs)?;

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the dispatcher and merge engine cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.dispatch;
        if d.min_batch == 0 {
            return Err(invalid("RISKROOM_MIN_BATCH", "must be at least 1"));
        }
        if d.max_batch < d.min_batch {
            return Err(invalid(
                "RISKROOM_MAX_BATCH",
                format!("must be >= min_batch ({})", d.min_batch),
            ));
        }
        if d.max_parallel == 0 {
            return Err(invalid("RISKROOM_MAX_PARALLEL", "must be at least 1"));
        }
        if d.max_retries > MAX_RETRIES_LIMIT {
            return Err(invalid(
                "RISKROOM_MAX_RETRIES",
                format!("must be at most {MAX_RETRIES_LIMIT}"),
            ));
        }
        if d.task_timeout.is_zero() {
            return Err(invalid("RISKROOM_TASK_TIMEOUT_SECS", "must be positive"));
        }

        let m = &self.merge;
        if !(0.0..=1.0).contains(&m.similarity_threshold) {
            return Err(invalid(
                "RISKROOM_SIMILARITY_THRESHOLD",
                "must be within [0, 1]",
            ));
        }
        if !(0.0..=m.similarity_threshold).contains(&m.ambiguous_floor) {
            return Err(invalid(
                "RISKROOM_AMBIGUOUS_FLOOR",
                "must be within [0, similarity_threshold]",
            ));
        }

        if self.max_active_jobs == 0 {
            return Err(invalid("RISKROOM_MAX_ACTIVE_JOBS", "must be at least 1"));
        }
        Ok(())
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(key, e.to_string())),
        None => Ok(default),
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}
