//! Configuration types for a scanbrief pipeline run.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. API keys live in a separate [`Credentials`]
//! value that is loaded once from the environment and never printed.

use crate::error::ScanbriefError;
use crate::pipeline::llm::MAX_BACKOFF_MS;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::prompt::PromptParams;
use crate::pipeline::report::ReportStyle;
use crate::progress::ProgressCallback;
use crate::prompts::TemplateRegistry;
use crate::providers::LlmProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Upper bound for `max_attempts`.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use scanbrief::{PipelineConfig, ProviderKind};
///
/// let config = PipelineConfig::builder()
///     .provider_kind(ProviderKind::Gemini)
///     .template("invoice")
///     .max_attempts(5)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Which extraction API to call. Default: OpenAI.
    pub provider_kind: ProviderKind,

    /// Model identifier for the extraction call. If None, uses the provider default.
    pub model: Option<String>,

    /// Pre-constructed extraction provider. Takes precedence over `provider_kind`.
    pub provider: Option<Arc<dyn LlmProvider>>,

    /// Override the provider's API base URL (proxies, gateways, tests).
    pub api_base_url: Option<String>,

    /// API keys for the extraction providers.
    pub credentials: Credentials,

    /// Sampling temperature for the extraction call. Default: 0.0.
    pub temperature: f32,

    /// Total extraction attempts, first call included. Range: 1–10. Default: 3.
    ///
    /// Only transient failures (timeouts, connection errors, 429, 5xx) are
    /// retried. Authentication and malformed-response errors fail at once.
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds. Doubles after each attempt, capped
    /// at one minute. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-attempt timeout for the extraction call in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Which OCR engine reads page images. Default: [`OcrBackend::Vision`].
    pub ocr_backend: OcrBackend,

    /// Pre-constructed OCR engine. Takes precedence over `ocr_backend`.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Vision OCR provider. "openai" and "gemini" use `credentials`; any
    /// other edgequake-llm provider name reads its own environment.
    /// If None, the extraction provider is used.
    pub ocr_provider_name: Option<String>,

    /// Vision model used for OCR. If None, uses `gpt-4.1-nano`.
    pub ocr_model: Option<String>,

    /// Tesseract language code. Default: "eng".
    pub tesseract_lang: String,

    /// Rendering DPI for scanned PDF pages. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest edge of a rasterised page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Directory holding the pdfium shared library. If None, the system
    /// library path (and `PDFIUM_LIB_PATH`) is searched.
    pub pdfium_lib_dir: Option<PathBuf>,

    /// Parent directory for per-run scratch directories. If None, the OS temp dir.
    pub scratch_parent: Option<PathBuf>,

    /// Template name, or `"auto"` to detect the document kind. Default: "auto".
    pub template: String,

    /// Known templates. Default: the four built-ins.
    pub templates: Arc<TemplateRegistry>,

    /// Prompt knobs (token hint, target language, input truncation).
    pub prompt: PromptParams,

    /// Report layout and typography.
    pub report_style: ReportStyle,

    /// Optional stage-progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider_kind: ProviderKind::default(),
            model: None,
            provider: None,
            api_base_url: None,
            credentials: Credentials::default(),
            temperature: 0.0,
            max_attempts: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            ocr_backend: OcrBackend::default(),
            ocr_engine: None,
            ocr_provider_name: None,
            ocr_model: None,
            tesseract_lang: "eng".to_string(),
            dpi: 150,
            max_rendered_pixels: 2000,
            pdfium_lib_dir: None,
            scratch_parent: None,
            template: "auto".to_string(),
            templates: Arc::new(TemplateRegistry::with_builtins()),
            prompt: PromptParams::default(),
            report_style: ReportStyle::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("provider_kind", &self.provider_kind)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LlmProvider>"))
            .field("api_base_url", &self.api_base_url)
            .field("credentials", &self.credentials)
            .field("temperature", &self.temperature)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("ocr_backend", &self.ocr_backend)
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|_| "<dyn OcrEngine>"))
            .field("ocr_model", &self.ocr_model)
            .field("dpi", &self.dpi)
            .field("template", &self.template)
            .field("prompt", &self.prompt)
            .field("report_style", &self.report_style.layout)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn provider_kind(mut self, kind: ProviderKind) -> Self {
        self.config.provider_kind = kind;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = Some(url.into());
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.clamp(1, MAX_ATTEMPTS_LIMIT);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms.min(MAX_BACKOFF_MS);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn ocr_backend(mut self, backend: OcrBackend) -> Self {
        self.config.ocr_backend = backend;
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn ocr_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.ocr_provider_name = Some(name.into());
        self
    }

    pub fn ocr_model(mut self, model: impl Into<String>) -> Self {
        self.config.ocr_model = Some(model.into());
        self
    }

    pub fn tesseract_lang(mut self, lang: impl Into<String>) -> Self {
        self.config.tesseract_lang = lang.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pdfium_lib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_dir = Some(dir.into());
        self
    }

    pub fn scratch_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_parent = Some(dir.into());
        self
    }

    pub fn template(mut self, name: impl Into<String>) -> Self {
        self.config.template = name.into();
        self
    }

    pub fn templates(mut self, registry: TemplateRegistry) -> Self {
        self.config.templates = Arc::new(registry);
        self
    }

    pub fn prompt_params(mut self, params: PromptParams) -> Self {
        self.config.prompt = params;
        self
    }

    pub fn target_language(mut self, lang: impl Into<String>) -> Self {
        self.config.prompt.target_language = Some(lang.into());
        self
    }

    pub fn report_style(mut self, style: ReportStyle) -> Self {
        self.config.report_style = style;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ScanbriefError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ScanbriefError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_attempts == 0 || c.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(ScanbriefError::InvalidConfig(format!(
                "max_attempts must be 1–{MAX_ATTEMPTS_LIMIT}, got {}",
                c.max_attempts
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(ScanbriefError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.template.trim().is_empty() {
            return Err(ScanbriefError::InvalidConfig(
                "template name must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

/// API keys for the extraction providers.
///
/// Loaded once (usually at process start) and passed explicitly to the
/// providers. `Debug` prints only whether a key is set.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    openai_api_key: Option<String>,
    google_api_key: Option<String>,
}

impl Credentials {
    /// Read `OPENAI_API_KEY` and `GOOGLE_API_KEY` (or its alias `GEMINI_API_KEY`).
    /// Empty values count as unset.
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            openai_api_key: read("OPENAI_API_KEY"),
            google_api_key: read("GOOGLE_API_KEY").or_else(|| read("GEMINI_API_KEY")),
        }
    }

    pub fn new(openai_api_key: Option<String>, google_api_key: Option<String>) -> Self {
        Self {
            openai_api_key,
            google_api_key,
        }
    }

    pub fn with_openai_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    pub fn with_google_key(mut self, key: impl Into<String>) -> Self {
        self.google_api_key = Some(key.into());
        self
    }

    /// The key for `kind`, if configured.
    pub fn key_for(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::OpenAi => self.openai_api_key.as_deref(),
            ProviderKind::Gemini => self.google_api_key.as_deref(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |k: &Option<String>| if k.is_some() { "<redacted>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("google_api_key", &mask(&self.google_api_key))
            .finish()
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Remote extraction API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions (default).
    #[default]
    OpenAi,
    /// Google Gemini `generateContent`.
    Gemini,
}

impl ProviderKind {
    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4.1-nano",
            ProviderKind::Gemini => "gemini-2.0-flash",
        }
    }

    /// Environment variable holding this provider's key.
    pub fn key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GOOGLE_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = ScanbriefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "gpt" => Ok(ProviderKind::OpenAi),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            other => Err(ScanbriefError::InvalidConfig(format!(
                "unknown provider '{other}' (expected openai or gemini)"
            ))),
        }
    }
}

/// Which engine turns page images into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackend {
    /// A multimodal model transcribes the page (default).
    #[default]
    Vision,
    /// Local Tesseract. Needs the `tesseract` feature.
    Tesseract,
}

impl FromStr for OcrBackend {
    type Err = ScanbriefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vision" | "vlm" => Ok(OcrBackend::Vision),
            "tesseract" => Ok(OcrBackend::Tesseract),
            other => Err(ScanbriefError::InvalidConfig(format!(
                "unknown OCR backend '{other}' (expected vision or tesseract)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.retry_backoff_ms, 500);
        assert_eq!(c.api_timeout_secs, 60);
        assert_eq!(c.temperature, 0.0);
        assert_eq!(c.template, "auto");
        assert_eq!(c.provider_kind, ProviderKind::OpenAi);
    }

    #[test]
    fn builder_clamps_values() {
        let c = PipelineConfig::builder()
            .dpi(1000)
            .max_attempts(0)
            .temperature(5.0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.max_attempts, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn builder_caps_retry_settings() {
        let c = PipelineConfig::builder()
            .max_attempts(u32::MAX)
            .retry_backoff_ms(u64::MAX)
            .build()
            .unwrap();
        assert_eq!(c.max_attempts, MAX_ATTEMPTS_LIMIT);
        assert_eq!(c.retry_backoff_ms, MAX_BACKOFF_MS);
    }

    #[test]
    fn build_rejects_zero_timeout() {
        let err = PipelineConfig::builder().api_timeout_secs(0).build().unwrap_err();
        assert!(matches!(err, ScanbriefError::InvalidConfig(_)));
    }

    #[test]
    fn build_rejects_blank_template() {
        assert!(PipelineConfig::builder().template("  ").build().is_err());
    }

    #[test]
    fn credentials_debug_redacts_keys() {
        let creds = Credentials::default().with_openai_key("sk-very-secret");
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("sk-very-secret"));
        assert!(dbg.contains("<redacted>"));
        assert!(dbg.contains("<unset>"));

        let config = PipelineConfig::builder().credentials(creds).build().unwrap();
        assert!(!format!("{config:?}").contains("sk-very-secret"));
    }

    #[test]
    fn credentials_key_lookup() {
        let creds = Credentials::new(Some("a".into()), None);
        assert_eq!(creds.key_for(ProviderKind::OpenAi), Some("a"));
        assert_eq!(creds.key_for(ProviderKind::Gemini), None);
    }

    #[test]
    fn provider_kind_parses() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("google".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!("claude".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn ocr_backend_parses() {
        assert_eq!("tesseract".parse::<OcrBackend>().unwrap(), OcrBackend::Tesseract);
        assert!("abbyy".parse::<OcrBackend>().is_err());
    }
}
