//! Vision OCR through any other provider edgequake-llm supports (Ollama,
//! Mistral, Azure, LM Studio, ...).
//!
//! These providers read their own settings from the environment, the way
//! edgequake-llm documents them. OpenAI and Gemini never come through here.

use super::{LlmProvider, QueryOptions};
use crate::error::ScanbriefError;
use crate::output::{LlmResponse, Prompt};
use crate::pipeline::encode::png_to_image_data;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

pub struct EdgequakeVision {
    inner: Arc<dyn LLMProvider>,
    name: String,
    model: String,
}

impl EdgequakeVision {
    /// Build the edgequake-llm provider called `name`.
    pub fn create(name: &str, model: &str) -> Result<Self, ScanbriefError> {
        let inner = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            ScanbriefError::InvalidConfig(format!("vision provider '{name}' unavailable: {e}"))
        })?;
        Ok(Self::new(inner, name, model))
    }

    pub fn new(inner: Arc<dyn LLMProvider>, name: &str, model: &str) -> Self {
        Self {
            inner,
            name: name.to_string(),
            model: model.to_string(),
        }
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: &QueryOptions,
    ) -> Result<LlmResponse, ScanbriefError> {
        let options = CompletionOptions {
            temperature: Some(options.temperature),
            max_tokens: options.max_tokens,
            ..Default::default()
        };
        let response = self
            .inner
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_error(&self.name, &e.to_string()))?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );

        let mut out = LlmResponse::new(response.content, &self.name, &self.model);
        out.prompt_tokens = response.prompt_tokens as usize;
        out.completion_tokens = response.completion_tokens as usize;
        Ok(out)
    }
}

#[async_trait]
impl LlmProvider for EdgequakeVision {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn query(
        &self,
        prompt: &Prompt,
        options: &QueryOptions,
    ) -> Result<LlmResponse, ScanbriefError> {
        let messages = vec![ChatMessage::user_with_images(prompt.text.as_str(), Vec::new())];
        self.chat(messages, options).await
    }

    async fn transcribe(
        &self,
        instructions: &str,
        png: &[u8],
        options: &QueryOptions,
    ) -> Result<LlmResponse, ScanbriefError> {
        let messages = vec![
            ChatMessage::system(instructions),
            ChatMessage::user_with_images("", vec![png_to_image_data(png)]),
        ];
        self.chat(messages, options).await
    }
}

/// edgequake-llm reports failures as text; sort them into the taxonomy.
pub(crate) fn classify_error(provider: &str, message: &str) -> ScanbriefError {
    let lower = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["401", "403", "unauthorized", "forbidden", "api key", "api_key", "authentication"]) {
        ScanbriefError::Auth {
            provider: provider.to_string(),
            detail: message.to_string(),
        }
    } else if has(&[
        "429", "500", "502", "503", "504", "rate limit", "timeout", "timed out", "connection",
        "overloaded", "unavailable", "temporarily",
    ]) {
        ScanbriefError::TransientService {
            provider: provider.to_string(),
            attempts: 1,
            detail: message.to_string(),
        }
    } else {
        ScanbriefError::ResponseFormat {
            provider: provider.to_string(),
            detail: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn error_text_is_classified() {
        let kind = |m: &str| classify_error("ollama", m).kind();
        assert_eq!(kind("API error: 401 Unauthorized"), ErrorKind::Auth);
        assert_eq!(kind("Incorrect API key provided"), ErrorKind::Auth);
        assert_eq!(kind("Rate limit exceeded (429)"), ErrorKind::TransientService);
        assert_eq!(kind("error sending request: connection refused"), ErrorKind::TransientService);
        assert_eq!(kind("model does not support images"), ErrorKind::ResponseFormat);
    }
}
