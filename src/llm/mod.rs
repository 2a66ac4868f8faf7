//! LLM integration.
//!
//! - `provider`: the `LlmProvider` trait and message types
//! - `reasoning`: the `ReasoningEngine` seam workers call, plus the
//!   LLM-backed implementation
//!
//! HTTP transport comes from rig-core; `RigAdapter` bridges rig's
//! `CompletionModel` to `LlmProvider`.

pub mod provider;
pub mod reasoning;
mod rig_adapter;

pub use provider::*;
pub use reasoning::{
    AnalysisBatch, AnalysisContext, AnalysisDocument, LlmReasoningEngine, ReasoningEngine,
};

pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::{ConfigError, LlmError};

const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub max_tokens: u32,
}

impl LlmConfig {
    /// `ANTHROPIC_API_KEY` is required; `RISKROOM_MODEL` is optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("ANTHROPIC_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;
        let model = lookup("RISKROOM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok(Self {
            api_key: secrecy::SecretString::from(api_key),
            model,
            max_tokens: 4096,
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(
        RigAdapter::new(model, &config.model, "anthropic")
            .with_default_max_tokens(config.max_tokens),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_config_error() {
        let err = LlmConfig::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "ANTHROPIC_API_KEY"));
    }

    #[test]
    fn model_override() {
        let config = LlmConfig::from_lookup(|key| match key {
            "ANTHROPIC_API_KEY" => Some("sk-test".to_string()),
            "RISKROOM_MODEL" => Some("claude-opus".to_string()),
            _ => None,
        })
        .unwrap();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "claude-opus");
    }
}
