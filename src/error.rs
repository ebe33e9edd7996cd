//! Error types for the scanbrief library.
//!
//! Two layers reflect the two questions a caller asks about a failure:
//!
//! * [`ScanbriefError`] — **what** went wrong. One variant per entry of the
//!   pipeline's error taxonomy, plus a few ambient variants (configuration,
//!   I/O, internal). Stage functions return this directly.
//!
//! * [`StageFailure`] — **where** it went wrong. The orchestrator wraps every
//!   stage-local error with the [`Stage`] that produced it and surfaces it to
//!   the caller unmodified. Nothing is swallowed on the way up.
//!
//! [`ErrorKind`] is the flat, serialisable discriminant the web UI and the
//! CLI report to users.

use crate::state::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Every error the scanbrief pipeline can produce.
#[derive(Debug, Error)]
pub enum ScanbriefError {
    // ── Upload / extraction ───────────────────────────────────────────────
    /// The declared MIME type (or sniffed content) is not JPEG, PNG or PDF.
    #[error("Unsupported document format '{mime}'. Upload a JPEG, PNG or PDF file.")]
    UnsupportedFormat { mime: String },

    /// The file could not be read, decoded, or yielded no text.
    #[error("Text extraction failed: {detail}")]
    Extraction { detail: String },

    // ── Prompting ─────────────────────────────────────────────────────────
    /// No template is registered under the requested name.
    #[error("Prompt template '{name}' not found. Known templates: {known}")]
    TemplateNotFound { name: String, known: String },

    // ── LLM ───────────────────────────────────────────────────────────────
    /// Network failure, timeout, rate limit or 5xx. Retried with backoff.
    #[error("LLM service '{provider}' unavailable after {attempts} attempt(s): {detail}")]
    TransientService {
        provider: String,
        attempts: u32,
        detail: String,
    },

    /// The provider rejected the credentials. Never retried.
    #[error("Authentication failed for LLM provider '{provider}': {detail}\nCheck the API key in your environment.")]
    Auth { provider: String, detail: String },

    /// The provider answered, but the body is not what its API promises.
    #[error("Malformed response from LLM provider '{provider}': {detail}")]
    ResponseFormat { provider: String, detail: String },

    // ── Normalisation / rendering ─────────────────────────────────────────
    /// The model output could not be parsed into the expected shape.
    #[error("Could not normalise LLM output: {detail}")]
    Normalization { detail: String },

    /// The report could not be laid out or serialised.
    #[error("Report rendering failed: {detail}")]
    Render { detail: String },

    /// The run was cancelled by the caller.
    #[error("Run cancelled")]
    Cancelled,

    // ── Ambient ───────────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading an input file or writing a report failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error (task panic, runtime creation, …).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanbriefError {
    /// Shorthand for [`ScanbriefError::Extraction`].
    pub fn extraction(detail: impl Into<String>) -> Self {
        Self::Extraction {
            detail: detail.into(),
        }
    }

    /// Shorthand for [`ScanbriefError::Normalization`].
    pub fn normalization(detail: impl Into<String>) -> Self {
        Self::Normalization {
            detail: detail.into(),
        }
    }

    /// Shorthand for [`ScanbriefError::Render`].
    pub fn render(detail: impl Into<String>) -> Self {
        Self::Render {
            detail: detail.into(),
        }
    }

    /// The flat discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::Extraction { .. } => ErrorKind::Extraction,
            Self::TemplateNotFound { .. } => ErrorKind::TemplateNotFound,
            Self::TransientService { .. } => ErrorKind::TransientService,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::ResponseFormat { .. } => ErrorKind::ResponseFormat,
            Self::Normalization { .. } => ErrorKind::Normalization,
            Self::Render { .. } => ErrorKind::Render,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Io { .. } => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only transient service failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientService { .. })
    }
}

/// Serialisable discriminant of [`ScanbriefError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    Extraction,
    TemplateNotFound,
    TransientService,
    Auth,
    ResponseFormat,
    Normalization,
    Render,
    Cancelled,
    InvalidConfig,
    Io,
    Internal,
}

impl ErrorKind {
    /// A short label suitable for a status line.
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "unsupported format",
            ErrorKind::Extraction => "extraction error",
            ErrorKind::TemplateNotFound => "template not found",
            ErrorKind::TransientService => "service unavailable",
            ErrorKind::Auth => "authentication error",
            ErrorKind::ResponseFormat => "malformed response",
            ErrorKind::Normalization => "normalisation error",
            ErrorKind::Render => "render error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidConfig => "invalid configuration",
            ErrorKind::Io => "I/O error",
            ErrorKind::Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A stage-local error wrapped with the stage that raised it.
///
/// This is what a failed pipeline run returns. The inner error is kept
/// intact so callers can still match on it.
#[derive(Debug, Error)]
#[error("{stage} stage failed ({kind}): {error}", kind = .error.kind())]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: ScanbriefError,
}

impl StageFailure {
    pub fn new(stage: Stage, error: ScanbriefError) -> Self {
        Self { stage, error }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}
