//! # scanbrief
//!
//! Turn a scanned document into a structured PDF brief.
//!
//! An uploaded JPEG, PNG or PDF is read (embedded text layers first, OCR for
//! everything else), a document-type template turns the text into an
//! extraction prompt, an LLM answers with JSON, the answer is normalised onto
//! the template's field schema, and the result is laid out as a PDF report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (JPEG / PNG / PDF)
//!  │
//!  ├─ 1. Extract    text layer or OCR per page (pdfium, vision LLM / Tesseract)
//!  ├─ 2. Prompt     template schema + text (invoice, contract, form, general)
//!  ├─ 3. Query      OpenAI / Gemini in JSON mode, retry + timeout + cancel
//!  ├─ 4. Normalise  JSON → typed fields, missing values marked absent
//!  └─ 5. Render     deterministic PDF report (lopdf)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanbrief::{analyze_file, Credentials, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .credentials(Credentials::from_env()) // OPENAI_API_KEY / GOOGLE_API_KEY
//!         .template("invoice")
//!         .build()?;
//!     let output = analyze_file("invoice.jpg", &config).await?;
//!     println!("total: {:?}", output.result.text("total_amount"));
//!     std::fs::write(&output.report.file_name, &output.report.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature     | Default | Description |
//! |-------------|---------|-------------|
//! | `server`    | on      | The axum web UI and JSON API ([`server`]) |
//! | `cli`       | on      | The `scanbrief` binary (clap + anyhow + tracing-subscriber) |
//! | `tesseract` | off     | Local OCR through libtesseract |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod providers;
#[cfg(feature = "server")]
pub mod server;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze_file, analyze_file_sync, analyze_to_file, Pipeline};
pub use config::{Credentials, OcrBackend, PipelineConfig, PipelineConfigBuilder, ProviderKind};
pub use error::{ErrorKind, ScanbriefError, StageFailure};
pub use output::{
    AnalysisOutput, ExtractedText, FieldValue, LlmResponse, NormalizedField, NormalizedResult,
    PageText, Prompt, Report, RunStats, TextSource,
};
pub use pipeline::input::{Document, DocumentFormat};
pub use pipeline::ocr::OcrEngine;
pub use pipeline::prompt::PromptParams;
pub use pipeline::report::{BaseFont, PageSize, ReportStyle};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use prompts::{FieldKind, FieldSpec, Template, TemplateRegistry};
pub use providers::{LlmProvider, QueryOptions};
pub use state::{RunState, Stage, StateMachine};
pub use tokio_util::sync::CancellationToken;
