//! Bridges rig-core's `CompletionModel` to `LlmProvider`.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role};

/// `LlmProvider` over any rig completion model.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
    provider: &'static str,
    default_max_tokens: u32,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
            default_max_tokens: 4096,
        }
    }

    /// Used when a request carries no `max_tokens` of its own.
    pub fn with_default_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }
}

/// A chat transcript split the way rig wants it.
#[derive(Debug)]
struct Prompt<'a> {
    preamble: Option<String>,
    history: Vec<&'a ChatMessage>,
    prompt: &'a ChatMessage,
}

fn split_messages<'a>(messages: &'a [ChatMessage], provider: &str) -> Result<Prompt<'a>, LlmError> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let mut turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();
    let prompt = turns.pop().ok_or_else(|| LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: "request has no user or assistant message".to_string(),
    })?;

    Ok(Prompt {
        preamble: (!system.is_empty()).then(|| system.join("\n\n")),
        history: turns,
        prompt,
    })
}

fn to_rig(message: &ChatMessage) -> Message {
    match message.role {
        Role::Assistant => Message::assistant(message.content.clone()),
        Role::User | Role::System => Message::user(message.content.clone()),
    }
}

/// rig reports provider failures as text; recover the cases callers act on.
fn classify(provider: &str, error: &CompletionError) -> LlmError {
    classify_message(provider, &error.to_string())
}

fn classify_message(provider: &str, message: &str) -> LlmError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate_limit") || lower.contains("rate limit") {
        LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        }
    } else if lower.contains("401")
        || lower.contains("authentication_error")
        || lower.contains("invalid x-api-key")
        || lower.contains("permission_error")
    {
        LlmError::AuthFailed {
            provider: provider.to_string(),
        }
    } else if lower.contains("jsonerror") || lower.contains("responseerror") {
        LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: message.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: message.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let parts = split_messages(&request.messages, self.provider)?;
        let history: Vec<Message> = parts.history.into_iter().map(to_rig).collect();

        let mut builder = self
            .model
            .completion_request(to_rig(parts.prompt))
            .messages(history)
            .max_tokens(u64::from(request.max_tokens.unwrap_or(self.default_max_tokens)));
        if let Some(preamble) = parts.preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(model = %self.model_name, error = %e, "Completion request failed");
            classify(self.provider, &e)
        })?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();
        let input_tokens = u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX);
        let output_tokens = u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX);
        tracing::debug!(
            model = %self.model_name,
            input_tokens,
            output_tokens,
            "Completion finished"
        );

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
            stop_reason: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_become_preamble() {
        let messages = vec![
            ChatMessage::system("Be precise."),
            ChatMessage::system("Cite pages."),
            ChatMessage::user("Analyze D1"),
            ChatMessage::assistant("{\"risks\": []}"),
            ChatMessage::user("Check D2 too"),
        ];
        let parts = split_messages(&messages, "anthropic").unwrap();

        assert_eq!(parts.preamble.as_deref(), Some("Be precise.\n\nCite pages."));
        assert_eq!(parts.history.len(), 2);
        assert_eq!(parts.history[1].role, Role::Assistant);
        assert_eq!(parts.prompt.content, "Check D2 too");
    }

    #[test]
    fn no_preamble_without_system_message() {
        let messages = vec![ChatMessage::user("Analyze D1")];
        let parts = split_messages(&messages, "anthropic").unwrap();
        assert!(parts.preamble.is_none());
        assert!(parts.history.is_empty());
    }

    #[test]
    fn system_only_request_rejected() {
        let messages = vec![ChatMessage::system("Be precise.")];
        assert!(matches!(
            split_messages(&messages, "anthropic"),
            Err(LlmError::RequestFailed { .. })
        ));
    }

    #[test]
    fn provider_failures_classified() {
        assert!(matches!(
            classify_message("anthropic", "ProviderError: 429 rate_limit_error"),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_message("anthropic", "ProviderError: authentication_error: invalid x-api-key"),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            classify_message("anthropic", "JsonError: expected value at line 1"),
            LlmError::InvalidResponse { .. }
        ));
        assert!(matches!(
            classify_message("anthropic", "HttpError: connection reset"),
            LlmError::RequestFailed { .. }
        ));
    }
}
