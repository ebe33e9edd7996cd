//! Extraction providers: one [`LlmProvider`] implementation per remote API.
//!
//! Providers do one HTTP round trip and classify the outcome into the error
//! taxonomy. Retries, timeouts and cancellation belong to
//! [`crate::pipeline::llm`], so a provider never sleeps or loops.
//!
//! | Outcome                                   | Error                 |
//! |-------------------------------------------|-----------------------|
//! | connect error, timeout, 429, 5xx          | `TransientService`    |
//! | 401, 403, missing or rejected key         | `Auth`                |
//! | other 4xx, undecodable body, no content   | `ResponseFormat`      |
//!
//! OpenAI and Gemini also read page images for vision OCR, with the same
//! [`Credentials`](crate::config::Credentials) as the extraction call. Other
//! vision backends come from edgequake-llm ([`edgequake`]).

pub mod edgequake;
pub mod gemini;
pub mod openai;

use crate::config::{PipelineConfig, ProviderKind};
use crate::error::ScanbriefError;
use crate::output::{LlmResponse, Prompt};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

pub use edgequake::EdgequakeVision;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Longest a body excerpt may be inside an error message.
const ERROR_BODY_EXCERPT: usize = 300;

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    /// Ask the API to constrain output to a JSON object.
    pub json_mode: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
            json_mode: true,
        }
    }
}

/// A remote text-generation API.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name used in errors and logs, e.g. `openai`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// One request/response round trip.
    async fn query(&self, prompt: &Prompt, options: &QueryOptions)
        -> Result<LlmResponse, ScanbriefError>;

    /// Transcribe one PNG page following `instructions`.
    ///
    /// Text-only providers keep this default, which refuses.
    async fn transcribe(
        &self,
        instructions: &str,
        png: &[u8],
        options: &QueryOptions,
    ) -> Result<LlmResponse, ScanbriefError> {
        let _ = (instructions, png, options);
        Err(ScanbriefError::InvalidConfig(format!(
            "provider '{}' cannot read images",
            self.name()
        )))
    }
}

/// Use the injected provider or build the one `config.provider_kind` names.
///
/// # Errors
/// [`ScanbriefError::Auth`] when the selected provider has no API key.
pub fn provider_from_config(config: &PipelineConfig) -> Result<Arc<dyn LlmProvider>, ScanbriefError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config
        .model
        .clone()
        .unwrap_or_else(|| config.provider_kind.default_model().to_string());
    build(config, config.provider_kind, model)
}

/// The provider that reads page images for vision OCR.
///
/// `ocr_provider_name` picks it: `openai` or `gemini` use the configured
/// credentials, any other name is handed to edgequake-llm. Unset means the
/// extraction provider's kind. `ocr_model` overrides the model.
///
/// # Errors
/// [`ScanbriefError::Auth`] when OpenAI/Gemini has no API key;
/// [`ScanbriefError::InvalidConfig`] when edgequake-llm cannot build the
/// named provider.
pub fn vision_provider_from_config(
    config: &PipelineConfig,
) -> Result<Arc<dyn LlmProvider>, ScanbriefError> {
    let kind = match config.ocr_provider_name.as_deref() {
        None => config.provider_kind,
        Some(name) => match name.parse::<ProviderKind>() {
            Ok(kind) => kind,
            Err(_) => {
                let model = config
                    .ocr_model
                    .as_deref()
                    .unwrap_or(ProviderKind::OpenAi.default_model());
                return Ok(Arc::new(EdgequakeVision::create(name, model)?));
            }
        },
    };
    let model = config
        .ocr_model
        .clone()
        .unwrap_or_else(|| kind.default_model().to_string());
    build(config, kind, model)
}

fn build(
    config: &PipelineConfig,
    kind: ProviderKind,
    model: String,
) -> Result<Arc<dyn LlmProvider>, ScanbriefError> {
    let key = config
        .credentials
        .key_for(kind)
        .ok_or_else(|| ScanbriefError::Auth {
            provider: kind.name().to_string(),
            detail: format!("no API key configured (set {})", kind.key_env()),
        })?
        .to_string();
    let client = http_client()?;

    Ok(match kind {
        ProviderKind::OpenAi => {
            let mut p = OpenAiProvider::new(client, key, model);
            if let Some(ref url) = config.api_base_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
        ProviderKind::Gemini => {
            let mut p = GeminiProvider::new(client, key, model);
            if let Some(ref url) = config.api_base_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
    })
}

/// Shared HTTP client. The overall deadline is enforced by the caller.
fn http_client() -> Result<reqwest::Client, ScanbriefError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("scanbrief/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ScanbriefError::Internal(format!("HTTP client: {e}")))
}

/// Map a transport-level failure.
pub(crate) fn transport_error(provider: &str, e: reqwest::Error) -> ScanbriefError {
    if e.is_decode() {
        return ScanbriefError::ResponseFormat {
            provider: provider.to_string(),
            detail: e.to_string(),
        };
    }
    ScanbriefError::TransientService {
        provider: provider.to_string(),
        attempts: 1,
        detail: e.to_string(),
    }
}

/// Map a non-success HTTP status.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> ScanbriefError {
    let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
    let detail = format!("HTTP {status}: {}", excerpt.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ScanbriefError::Auth {
            provider: provider.to_string(),
            detail,
        },
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            ScanbriefError::TransientService {
                provider: provider.to_string(),
                attempts: 1,
                detail,
            }
        }
        s if s.is_server_error() => ScanbriefError::TransientService {
            provider: provider.to_string(),
            attempts: 1,
            detail,
        },
        _ => ScanbriefError::ResponseFormat {
            provider: provider.to_string(),
            detail,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::error::ErrorKind;

    #[test]
    fn status_mapping() {
        let kind = |s: u16| status_error("openai", StatusCode::from_u16(s).unwrap(), "").kind();
        assert_eq!(kind(401), ErrorKind::Auth);
        assert_eq!(kind(403), ErrorKind::Auth);
        assert_eq!(kind(429), ErrorKind::TransientService);
        assert_eq!(kind(500), ErrorKind::TransientService);
        assert_eq!(kind(503), ErrorKind::TransientService);
        assert_eq!(kind(400), ErrorKind::ResponseFormat);
    }

    #[test]
    fn status_error_truncates_body() {
        let body = "x".repeat(10_000);
        let msg = status_error("gemini", StatusCode::BAD_GATEWAY, &body).to_string();
        assert!(msg.len() < 1_000);
    }

    #[test]
    fn missing_key_is_auth_error() {
        let config = PipelineConfig::builder()
            .provider_kind(ProviderKind::Gemini)
            .credentials(Credentials::default().with_openai_key("sk-1"))
            .build()
            .unwrap();
        match provider_from_config(&config) {
            Err(ScanbriefError::Auth { provider, detail }) => {
                assert_eq!(provider, "gemini");
                assert!(detail.contains("GOOGLE_API_KEY"));
            }
            Err(other) => panic!("unexpected {other:?}"),
            Ok(_) => panic!("provider built without a key"),
        }
    }

    #[test]
    fn builds_selected_provider() {
        let config = PipelineConfig::builder()
            .credentials(Credentials::default().with_openai_key("sk-1"))
            .model("gpt-4o-mini")
            .build()
            .unwrap();
        let provider = provider_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "gpt-4o-mini");
    }

    #[test]
    fn vision_provider_uses_configured_credentials() {
        let config = PipelineConfig::builder()
            .provider_kind(ProviderKind::Gemini)
            .credentials(Credentials::default().with_google_key("g-config-only"))
            .build()
            .unwrap();
        let provider = vision_provider_from_config(&config).unwrap();
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.model(), ProviderKind::Gemini.default_model());
    }

    #[test]
    fn vision_provider_can_differ_from_extraction() {
        let config = PipelineConfig::builder()
            .credentials(Credentials::default().with_google_key("g-1"))
            .ocr_provider_name("gemini")
            .ocr_model("gemini-2.5-flash")
            .build()
            .unwrap();
        let provider = vision_provider_from_config(&config).unwrap();
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.model(), "gemini-2.5-flash");
    }

    #[test]
    fn vision_provider_without_key_is_auth_error() {
        let config = PipelineConfig::builder()
            .credentials(Credentials::default())
            .build()
            .unwrap();
        assert!(matches!(
            vision_provider_from_config(&config),
            Err(ScanbriefError::Auth { .. })
        ));
    }
}
