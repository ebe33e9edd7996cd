//! OCR engines: "PNG bytes in, text out".
//!
//! [`VisionOcr`] hands the page image to a multimodal model through the
//! provider [`crate::providers::vision_provider_from_config`] builds.
//! [`TesseractOcr`] (feature `tesseract`) runs locally. Tests and embedders
//! can supply their own [`OcrEngine`] through
//! [`crate::config::PipelineConfigBuilder::ocr_engine`].

use crate::config::{OcrBackend, PipelineConfig};
use crate::error::ScanbriefError;
use crate::pipeline::llm::RetryPolicy;
use crate::prompts::OCR_SYSTEM_PROMPT;
use crate::providers::{vision_provider_from_config, LlmProvider, QueryOptions};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Turns one page image into text.
///
/// Callers race `recognize` against the run's cancellation token, so an
/// engine may simply be dropped mid-call.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Recognise the text on a PNG-encoded page. Blank pages yield `""`.
    async fn recognize(&self, png: &[u8]) -> Result<String, ScanbriefError>;
}

/// Build the engine selected by `config`, unless one was injected.
pub fn engine_from_config(config: &PipelineConfig) -> Result<Arc<dyn OcrEngine>, ScanbriefError> {
    if let Some(ref engine) = config.ocr_engine {
        return Ok(Arc::clone(engine));
    }
    match config.ocr_backend {
        OcrBackend::Vision => Ok(Arc::new(VisionOcr::from_config(config)?)),
        #[cfg(feature = "tesseract")]
        OcrBackend::Tesseract => Ok(Arc::new(TesseractOcr::new(config.tesseract_lang.clone()))),
        #[cfg(not(feature = "tesseract"))]
        OcrBackend::Tesseract => Err(ScanbriefError::InvalidConfig(
            "the tesseract OCR backend needs the `tesseract` feature".into(),
        )),
    }
}

// ── Vision OCR ───────────────────────────────────────────────────────────

/// OCR by a vision language model.
///
/// Transient failures are retried under the same [`RetryPolicy`] as the
/// extraction call; auth and request errors surface after one attempt.
pub struct VisionOcr {
    provider: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl VisionOcr {
    pub fn new(provider: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Vision provider and retry policy from `config`; keys come from
    /// `config.credentials` only.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ScanbriefError> {
        Ok(Self::new(
            vision_provider_from_config(config)?,
            RetryPolicy::from_config(config),
        ))
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    fn name(&self) -> &str {
        "vision"
    }

    async fn recognize(&self, png: &[u8]) -> Result<String, ScanbriefError> {
        let start = Instant::now();
        let options = QueryOptions {
            temperature: 0.0,
            max_tokens: Some(4096),
            json_mode: false,
        };
        let provider = &self.provider;
        let options = &options;
        // Cancellation is the caller's: it drops this future.
        let uncancelled = CancellationToken::new();

        let (response, attempt) = self
            .policy
            .run(provider.name(), &uncancelled, None, move || {
                provider.transcribe(OCR_SYSTEM_PROMPT, png, options)
            })
            .await?;

        debug!(
            "Vision OCR ({}): attempt {}, {} input tokens, {} output tokens, {:?}",
            provider.model(),
            attempt,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(clean_ocr_text(&response.content))
    }
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// Local OCR through libtesseract.
#[cfg(feature = "tesseract")]
pub struct TesseractOcr {
    lang: String,
}

#[cfg(feature = "tesseract")]
impl TesseractOcr {
    pub fn new(lang: impl Into<String>) -> Self {
        Self { lang: lang.into() }
    }
}

#[cfg(feature = "tesseract")]
#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, png: &[u8]) -> Result<String, ScanbriefError> {
        let lang = self.lang.clone();
        let png = png.to_vec();
        tokio::task::spawn_blocking(move || {
            let text = tesseract::Tesseract::new(None, Some(&lang))
                .map_err(tesseract_failed)?
                .set_image_from_mem(&png)
                .map_err(tesseract_failed)?
                .get_text()
                .map_err(tesseract_failed)?;
            Ok(clean_ocr_text(&text))
        })
        .await
        .map_err(|e| ScanbriefError::Internal(format!("OCR task panicked: {}", e)))?
    }
}

#[cfg(feature = "tesseract")]
fn tesseract_failed(e: impl std::fmt::Display) -> ScanbriefError {
    ScanbriefError::extraction(format!("tesseract failed: {e}"))
}

// ── Cleanup ──────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```\s*$").unwrap());

/// Strip fences the model added anyway, normalise line endings and drop
/// invisible characters.
pub fn clean_ocr_text(raw: &str) -> String {
    let normalised = raw.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed = normalised.trim();
    let unfenced = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    };
    unfenced
        .replace(['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'], "")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}
