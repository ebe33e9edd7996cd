//! Google Gemini `generateContent`.

use super::{status_error, transport_error, LlmProvider, QueryOptions};
use crate::error::ScanbriefError;
use crate::output::{LlmResponse, Prompt};
use crate::pipeline::encode::png_to_image_data;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(client: Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
}

impl GeminiProvider {
    async fn generate(
        &self,
        parts: serde_json::Value,
        options: &QueryOptions,
    ) -> Result<LlmResponse, ScanbriefError> {
        let mut generation_config = json!({ "temperature": options.temperature });
        if let Some(max) = options.max_tokens {
            generation_config["maxOutputTokens"] = json!(max);
        }
        if options.json_mode {
            generation_config["responseMimeType"] = json!("application/json");
        }
        let body = json!({
            "contents": [ { "role": "user", "parts": parts } ],
            "generationConfig": generation_config,
        });

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
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
            // Gemini reports a bad key as 400 INVALID_ARGUMENT.
            if status == StatusCode::BAD_REQUEST && text.contains("API_KEY_INVALID") {
                return Err(ScanbriefError::Auth {
                    provider: self.name().to_string(),
                    detail: "API key not valid".into(),
                });
            }
            return Err(status_error(self.name(), status, &text));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| ScanbriefError::ResponseFormat {
                provider: self.name().to_string(),
                detail: format!("undecodable body: {e}"),
            })?;

        let content: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ScanbriefError::ResponseFormat {
                provider: self.name().to_string(),
                detail: "response has no candidate text".into(),
            });
        }

        let mut out = LlmResponse::new(content, self.name(), &self.model);
        if let Some(usage) = parsed.usage_metadata {
            out.prompt_tokens = usage.prompt_token_count;
            out.completion_tokens = usage.candidates_token_count;
        }
        Ok(out)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn query(
        &self,
        prompt: &Prompt,
        options: &QueryOptions,
    ) -> Result<LlmResponse, ScanbriefError> {
        self.generate(json!([ { "text": prompt.text } ]), options)
            .await
    }

    async fn transcribe(
        &self,
        instructions: &str,
        png: &[u8],
        options: &QueryOptions,
    ) -> Result<LlmResponse, ScanbriefError> {
        let image = png_to_image_data(png);
        let parts = json!([
            { "text": instructions },
            { "inlineData": { "mimeType": image.mime_type, "data": image.data } },
        ]);
        self.generate(parts, options).await
    }
}
