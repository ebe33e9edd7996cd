//! OpenAI chat completions.

use super::{status_error, transport_error, LlmProvider, QueryOptions};
use crate::error::ScanbriefError;
use crate::output::{LlmResponse, Prompt};
use crate::pipeline::encode::png_to_image_data;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const SYSTEM_MESSAGE: &str = "You are a helpful assistant designed to output JSON.";

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(client: Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point at a compatible endpoint (e.g. `http://localhost:8000/v1`).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<serde_json::Value>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

impl OpenAiProvider {
    async fn complete(
        &self,
        messages: Vec<serde_json::Value>,
        options: &QueryOptions,
    ) -> Result<LlmResponse, ScanbriefError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: options
                .json_mode
                .then(|| json!({"type": "json_object"})),
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("POST {} (model={})", url, self.model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(self.name(), e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(self.name(), e))?;
        if !status.is_success() {
            return Err(status_error(self.name(), status, &text));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| ScanbriefError::ResponseFormat {
                provider: self.name().to_string(),
                detail: format!("undecodable body: {e}"),
            })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ScanbriefError::ResponseFormat {
                provider: self.name().to_string(),
                detail: "response has no message content".into(),
            })?;

        let mut out = LlmResponse::new(content, self.name(), &self.model);
        if let Some(usage) = parsed.usage {
            out.prompt_tokens = usage.prompt_tokens;
            out.completion_tokens = usage.completion_tokens;
        }
        Ok(out)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn query(
        &self,
        prompt: &Prompt,
        options: &QueryOptions,
    ) -> Result<LlmResponse, ScanbriefError> {
        let messages = vec![
            json!({"role": "system", "content": SYSTEM_MESSAGE}),
            json!({"role": "user", "content": prompt.text}),
        ];
        self.complete(messages, options).await
    }

    async fn transcribe(
        &self,
        instructions: &str,
        png: &[u8],
        options: &QueryOptions,
    ) -> Result<LlmResponse, ScanbriefError> {
        let image = png_to_image_data(png);
        let messages = vec![
            json!({"role": "system", "content": instructions}),
            json!({"role": "user", "content": [{
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{};base64,{}", image.mime_type, image.data),
                    "detail": "high",
                },
            }]}),
        ];
        self.complete(messages, options).await
    }
}
