//! Bridges rig-core's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::CompletionModel;
use rig::message::{AssistantContent, Message};
use rust_decimal::Decimal;

use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

/// Wraps any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }

    fn map_error(&self, err: impl std::fmt::Display) -> LlmError {
        let reason = err.to_string();
        let lower = reason.to_lowercase();
        if lower.contains("401") || lower.contains("authentication") || lower.contains("api key") {
            LlmError::AuthFailed {
                provider: self.provider.to_string(),
            }
        } else if lower.contains("429") || lower.contains("rate limit") {
            LlmError::RateLimited {
                provider: self.provider.to_string(),
                retry_after: None,
            }
        } else {
            LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason,
            }
        }
    }
}

/// Split our message list into (preamble, history, prompt) the way rig expects.
///
/// System messages are joined into the preamble; the final user message is
/// the prompt and everything else is history.
fn split_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<Message>, Option<Message>) {
    let mut system = Vec::new();
    let mut history = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system.push(msg.content),
            Role::User => history.push(Message::user(msg.content)),
            Role::Assistant => history.push(Message::assistant(msg.content)),
        }
    }

    let prompt = match history.last() {
        Some(Message::User { .. }) => history.pop(),
        _ => None,
    };
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));
    (preamble, history, prompt)
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        costs::model_cost(&self.model_name)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, history, prompt) = split_messages(request.messages);
        let prompt = prompt.ok_or_else(|| LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason: "completion request has no trailing user message".to_string(),
        })?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let content = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let output_tokens = u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX);
        let finish_reason = match request.max_tokens {
            Some(max) if output_tokens >= max => FinishReason::Length,
            _ if content.is_empty() => FinishReason::Unknown,
            _ => FinishReason::Stop,
        };

        tracing::debug!(
            model = %self.model_name,
            input_tokens = response.usage.input_tokens,
            output_tokens,
            "LLM completion finished"
        );

        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_moves_system_to_preamble_and_last_user_to_prompt() {
        let (preamble, history, prompt) = split_messages(vec![
            ChatMessage::system("rules"),
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::system("more rules"),
            ChatMessage::user("second"),
        ]);

        assert_eq!(preamble.as_deref(), Some("rules\n\nmore rules"));
        assert_eq!(history.len(), 2);
        assert!(matches!(prompt, Some(Message::User { .. })));
    }

    #[test]
    fn split_without_trailing_user_has_no_prompt() {
        let (preamble, history, prompt) =
            split_messages(vec![ChatMessage::user("q"), ChatMessage::assistant("a")]);
        assert!(preamble.is_none());
        assert_eq!(history.len(), 2);
        assert!(prompt.is_none());
    }
}
