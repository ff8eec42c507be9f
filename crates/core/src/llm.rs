//! Completion provider collaborator.
//!
//! The engine treats the model as a black-box text completion service: it
//! hands over the system prompt and the bounded context window and receives
//! raw assistant text back. Everything structured about that text is the
//! parser's business, not this module's.

use crate::context::{ConversationTurn, Role};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("rate limited by completion provider")]
    RateLimited,
    #[error("completion provider unavailable: {0}")]
    Unavailable(String),
    #[error("invalid completion response: {0}")]
    Invalid(String),
}

impl CompletionError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CompletionError::RateLimited | CompletionError::Unavailable(_)
        )
    }
}

/// A generic client for requesting a completion over a context window.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        window: &[ConversationTurn],
    ) -> Result<String, CompletionError>;
}

/// An implementation of `CompletionClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    pub fn new(api_key: &str, api_base: &str, model: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

fn classify(e: OpenAIError) -> CompletionError {
    match e {
        OpenAIError::ApiError(api) => {
            let code = api.code.clone().unwrap_or_default();
            let kind = api.r#type.clone().unwrap_or_default();
            if code.contains("rate_limit") || kind.contains("rate_limit") {
                CompletionError::RateLimited
            } else {
                CompletionError::Unavailable(api.message)
            }
        }
        OpenAIError::Reqwest(e) => CompletionError::Unavailable(e.to_string()),
        OpenAIError::JSONDeserialize(e) => CompletionError::Invalid(e.to_string()),
        other => CompletionError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn complete(
        &self,
        system_prompt: &str,
        window: &[ConversationTurn],
    ) -> Result<String, CompletionError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(classify)?
                .into(),
        ];
        for turn in window {
            match turn.role {
                Role::User => messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.text.clone())
                        .build()
                        .map_err(classify)?
                        .into(),
                ),
                Role::Assistant => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.text.clone())
                        .build()
                        .map_err(classify)?
                        .into(),
                ),
                Role::System => messages.push(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(turn.text.clone())
                        .build()
                        .map_err(classify)?
                        .into(),
                ),
            }
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(classify)?;

        let response = self.client.chat().create(request).await.map_err(classify)?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| CompletionError::Invalid("completion had no text content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_unavailable_are_transient() {
        assert!(CompletionError::RateLimited.is_transient());
        assert!(CompletionError::Unavailable("503".into()).is_transient());
        assert!(!CompletionError::Invalid("empty".into()).is_transient());
    }
}
