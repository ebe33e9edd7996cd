//! Pipeline orchestration and the public entry points.
//!
//! A run walks the stages strictly in order:
//!
//! ```text
//! Uploaded → Extracting → Prompting → Querying → Normalizing → Rendering → Done
//!     └──────────┴────────────┴──────────┴────────────┴────────────┴──▶ Failed
//! ```
//!
//! Every stage error is wrapped in a [`StageFailure`] carrying the stage that
//! raised it; nothing is retried here (the extraction client owns retries)
//! and no partial report is ever returned. Cancellation is checked before
//! each stage starts and inside the extraction call.

use crate::config::PipelineConfig;
use crate::error::{ScanbriefError, StageFailure};
use crate::output::{AnalysisOutput, RunStats};
use crate::pipeline::extract::extract_text;
use crate::pipeline::input::{Document, ScratchDir};
use crate::pipeline::llm::ExtractionClient;
use crate::pipeline::normalize::normalize;
use crate::pipeline::prompt::build_prompt;
use crate::pipeline::report::render_report;
use crate::progress::ProgressCallback;
use crate::providers::provider_from_config;
use crate::state::{Stage, StateMachine};
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Runs documents through the analysis stages with one configuration.
///
/// Cheap to clone; runs share no mutable state.
#[derive(Clone, Debug)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Analyse an uploaded document.
    ///
    /// # Errors
    /// A [`StageFailure`] naming the stage that failed. Cancellation during
    /// the extraction call fails at [`Stage::Querying`], during OCR at
    /// [`Stage::Extracting`]; cancellation seen between stages fails at the
    /// stage about to start.
    pub async fn run(
        &self,
        doc: Document,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutput, StageFailure> {
        self.run_tracked(doc, cancel).await.0
    }

    /// Like [`Pipeline::run`], also returning the state machine so callers
    /// can inspect the visited states.
    pub async fn run_tracked(
        &self,
        doc: Document,
        cancel: &CancellationToken,
    ) -> (Result<AnalysisOutput, StageFailure>, StateMachine) {
        let mut sm = StateMachine::new();
        let progress = self.config.progress_callback.clone();

        let result = self.drive(doc, cancel, &mut sm, progress.as_ref()).await;
        match &result {
            Ok(output) => {
                if let Err(e) = sm.complete() {
                    error!("{}", e);
                }
                if let Some(cb) = &progress {
                    cb.on_done(output.report.bytes.len());
                }
            }
            Err(failure) => {
                error!("{}", failure);
                if let Err(e) = sm.fail(failure) {
                    error!("{}", e);
                }
                if let Some(cb) = &progress {
                    cb.on_failed(failure);
                }
            }
        }
        (result, sm)
    }

    /// Validate raw upload bytes and analyse them.
    ///
    /// Upload problems fail at [`Stage::Uploaded`].
    pub async fn run_upload(
        &self,
        bytes: Vec<u8>,
        mime: Option<String>,
        file_name: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutput, StageFailure> {
        let doc = match Document::from_upload_async(bytes, mime, file_name).await {
            Ok(doc) => doc,
            Err(e) => return Err(self.reject_upload(e)),
        };
        self.run(doc, cancel).await
    }

    fn reject_upload(&self, e: ScanbriefError) -> StageFailure {
        let failure = StageFailure::new(Stage::Uploaded, e);
        error!("{}", failure);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_failed(&failure);
        }
        failure
    }

    async fn drive(
        &self,
        doc: Document,
        cancel: &CancellationToken,
        sm: &mut StateMachine,
        progress: Option<&ProgressCallback>,
    ) -> Result<AnalysisOutput, StageFailure> {
        let config = &self.config;
        let total_start = Instant::now();
        let mut stats = RunStats {
            total_pages: doc.page_count(),
            ..RunStats::default()
        };
        info!(
            "Analysing {} ({}, {} page(s), {} bytes)",
            doc.file_name().unwrap_or("upload"),
            doc.format().mime(),
            doc.page_count(),
            doc.bytes().len()
        );

        // ── Extracting ───────────────────────────────────────────────────
        enter(sm, Stage::Extracting, cancel, progress)?;
        let extract_start = Instant::now();
        let extracted = {
            let scratch = ScratchDir::create(config.scratch_parent.as_deref())
                .map_err(|e| StageFailure::new(Stage::Extracting, e))?;
            extract_text(&doc, &scratch, config, cancel)
                .await
                .map_err(|e| StageFailure::new(Stage::Extracting, e))?
            // scratch dropped (and removed) here
        };
        stats.extract_duration_ms = extract_start.elapsed().as_millis() as u64;
        stats.ocr_pages = extracted.ocr_pages();
        stats.extracted_chars = extracted.pages.iter().map(|p| p.text.chars().count()).sum();
        info!(
            "Extracted {} chars from {} page(s) ({} via OCR) in {}ms",
            stats.extracted_chars, stats.total_pages, stats.ocr_pages, stats.extract_duration_ms
        );
        leave(Stage::Extracting, progress);

        // ── Prompting ────────────────────────────────────────────────────
        enter(sm, Stage::Prompting, cancel, progress)?;
        let prompt = build_prompt(&extracted, &config.template, &config.prompt, &config.templates)
            .map_err(|e| StageFailure::new(Stage::Prompting, e))?;
        let template = config
            .templates
            .get(&prompt.template)
            .map_err(|e| StageFailure::new(Stage::Prompting, e))?;
        info!("Using template '{}'", template.name);
        debug!("Prompt is {} chars", prompt.text.len());
        leave(Stage::Prompting, progress);

        // ── Querying ─────────────────────────────────────────────────────
        enter(sm, Stage::Querying, cancel, progress)?;
        let llm_start = Instant::now();
        let provider =
            provider_from_config(config).map_err(|e| StageFailure::new(Stage::Querying, e))?;
        let response = ExtractionClient::new(provider, config)
            .extract(&prompt, cancel)
            .await
            .map_err(|e| StageFailure::new(Stage::Querying, e))?;
        stats.llm_duration_ms = llm_start.elapsed().as_millis() as u64;
        stats.prompt_tokens = response.prompt_tokens;
        stats.completion_tokens = response.completion_tokens;
        stats.llm_attempts = response.attempts;
        leave(Stage::Querying, progress);

        // ── Normalizing ──────────────────────────────────────────────────
        enter(sm, Stage::Normalizing, cancel, progress)?;
        let result = normalize(&response.content, template)
            .map_err(|e| StageFailure::new(Stage::Normalizing, e))?;
        leave(Stage::Normalizing, progress);

        // ── Rendering ────────────────────────────────────────────────────
        enter(sm, Stage::Rendering, cancel, progress)?;
        let report = render_report(&result, &config.report_style)
            .map_err(|e| StageFailure::new(Stage::Rendering, e))?;
        stats.report_bytes = report.bytes.len();
        leave(Stage::Rendering, progress);

        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Run complete: {} report ({} bytes) in {}ms",
            result.template, stats.report_bytes, stats.total_duration_ms
        );

        Ok(AnalysisOutput {
            result,
            report,
            extracted,
            stats,
        })
    }
}

/// Check for cancellation, then move the machine into `stage`.
fn enter(
    sm: &mut StateMachine,
    stage: Stage,
    cancel: &CancellationToken,
    progress: Option<&ProgressCallback>,
) -> Result<(), StageFailure> {
    if cancel.is_cancelled() {
        return Err(StageFailure::new(stage, ScanbriefError::Cancelled));
    }
    sm.advance(stage)
        .map_err(|e| StageFailure::new(stage, ScanbriefError::Internal(e.to_string())))?;
    debug!("Stage {} started", stage);
    if let Some(cb) = progress {
        cb.on_stage_start(stage);
    }
    Ok(())
}

fn leave(stage: Stage, progress: Option<&ProgressCallback>) {
    if let Some(cb) = progress {
        cb.on_stage_complete(stage);
    }
}

// ── Convenience entry points ─────────────────────────────────────────────

/// Analyse a JPEG, PNG or PDF file on disk.
///
/// The format is taken from the file extension and verified against the
/// content.
pub async fn analyze_file(
    path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<AnalysisOutput, StageFailure> {
    let pipeline = Pipeline::new(config.clone());
    let doc = match Document::from_path(path.as_ref()).await {
        Ok(doc) => doc,
        Err(e) => return Err(pipeline.reject_upload(e)),
    };
    pipeline.run(doc, &CancellationToken::new()).await
}

/// Analyse a file and write the PDF report to `output_path`.
///
/// Uses atomic write (temp file + rename) so a failed run never leaves a
/// partial report behind.
pub async fn analyze_to_file(
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<AnalysisOutput, StageFailure> {
    let output = analyze_file(input, config).await?;
    let path = output_path.as_ref();
    let io_failure = |e: std::io::Error| {
        StageFailure::new(
            Stage::Rendering,
            ScanbriefError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        )
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_failure)?;
    }
    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, &output.report.bytes)
        .await
        .map_err(io_failure)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(io_failure)?;
    info!("Report written to {}", path.display());

    Ok(output)
}

/// Synchronous wrapper around [`analyze_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_file_sync(
    path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<AnalysisOutput, StageFailure> {
    tokio::runtime::Runtime::new()
        .map_err(|e| {
            StageFailure::new(
                Stage::Uploaded,
                ScanbriefError::Internal(format!("Failed to create tokio runtime: {e}")),
            )
        })?
        .block_on(analyze_file(path, config))
}
