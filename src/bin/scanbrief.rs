//! CLI binary for scanbrief.
//!
//! A thin shim over the library crate: `serve` starts the web UI, `analyze`
//! runs one file and writes the PDF report, `templates` lists what the
//! prompt builder knows.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use scanbrief::server::{self, ServerConfig, DEFAULT_UPLOAD_LIMIT};
use scanbrief::{
    analyze_file, analyze_to_file, BaseFont, Credentials, OcrBackend, PageSize, PipelineConfig,
    PipelineProgressCallback, ProgressCallback, PromptParams, ProviderKind, ReportStyle, Stage,
    StageFailure, TemplateRegistry,
};
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner showing the current stage; retries and failures are printed above it.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Uploaded");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

fn stage_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Uploaded => "document accepted",
        Stage::Extracting => "reading text…",
        Stage::Prompting => "building prompt…",
        Stage::Querying => "waiting for the model…",
        Stage::Normalizing => "mapping fields…",
        Stage::Rendering => "laying out report…",
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix(format!("{stage}"));
        self.bar.set_message(stage_message(stage));
    }

    fn on_stage_complete(&self, stage: Stage) {
        self.bar.println(format!("  {} {}", green("✓"), stage));
    }

    fn on_page_extracted(&self, page_num: usize, total_pages: usize) {
        self.bar
            .set_message(format!("page {page_num}/{total_pages}"));
    }

    fn on_retry(&self, attempt: u32, backoff_ms: u64, reason: &str) {
        let reason = if reason.chars().count() > 80 {
            format!("{}\u{2026}", reason.chars().take(79).collect::<String>())
        } else {
            reason.to_string()
        };
        self.bar.println(format!(
            "  {} attempt {} failed ({}), retrying in {}ms",
            yellow("↻"),
            attempt,
            dim(&reason),
            backoff_ms
        ));
    }

    fn on_failed(&self, failure: &StageFailure) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} failed: {}",
            red("✘"),
            bold(failure.stage.as_str()),
            failure.kind()
        );
    }

    fn on_done(&self, report_len: usize) {
        self.bar.finish_and_clear();
        eprintln!("{} report ready ({} bytes)", green("✔"), report_len);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Start the web UI on :8080
  scanbrief serve

  # Analyse one file, report next to it
  scanbrief analyze invoice.jpg -o invoice_report.pdf

  # Force a template, answer in French, use Gemini
  scanbrief analyze --template contract --language French --provider gemini lease.pdf

  # Print the normalised fields as JSON
  scanbrief analyze --json receipt.png

  # Custom templates
  scanbrief templates --templates-file my_templates.toml

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY        OpenAI API key (extraction and vision OCR)
  GOOGLE_API_KEY        Google Gemini API key (alias: GEMINI_API_KEY)
  PORT                  Port for `serve` (default 8080)
  PDFIUM_LIB_PATH       Path to libpdfium, for scanned PDFs
  SCANBRIEF_*           Every flag has a SCANBRIEF_ variable, e.g. SCANBRIEF_TEMPLATE
  RUST_LOG              Log filter, e.g. scanbrief=debug

A .env file in the working directory is loaded at startup.
"#;

/// Turn scanned documents into structured PDF briefs.
#[derive(Parser, Debug)]
#[command(
    name = "scanbrief",
    version,
    about = "Turn scanned documents into structured PDF briefs",
    long_about = "Extract text from a JPEG, PNG or PDF (OCR where needed), ask an LLM for the \
fields of an invoice, contract, form or general document, and lay the answer out as a PDF report.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SCANBRIEF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SCANBRIEF_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the web UI and JSON API.
    Serve(ServeArgs),
    /// Analyse one document and write the PDF report.
    Analyze(AnalyzeArgs),
    /// List known templates.
    Templates {
        /// TOML file with extra `[[template]]` tables.
        #[arg(long, env = "SCANBRIEF_TEMPLATES_FILE")]
        templates_file: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "SCANBRIEF_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = server::DEFAULT_PORT)]
    port: u16,

    /// Maximum upload size in MiB.
    #[arg(long, env = "SCANBRIEF_UPLOAD_LIMIT_MB", default_value_t = DEFAULT_UPLOAD_LIMIT / (1024 * 1024))]
    upload_limit_mb: usize,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// JPEG, PNG or PDF file.
    input: PathBuf,

    /// Where to write the report. Default: `<kind>_analysis_summary.pdf` in
    /// the current directory.
    #[arg(short, long, env = "SCANBRIEF_OUTPUT")]
    output: Option<PathBuf>,

    /// Print the normalised result as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "SCANBRIEF_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

/// Flags shared by `serve` and `analyze`.
#[derive(Args, Debug)]
struct PipelineArgs {
    /// Extraction provider: openai or gemini.
    #[arg(long, env = "SCANBRIEF_PROVIDER", default_value = "openai")]
    provider: ProviderKind,

    /// Extraction model. Default: gpt-4.1-nano / gemini-2.0-flash.
    #[arg(long, env = "SCANBRIEF_MODEL")]
    model: Option<String>,

    /// Override the provider's API base URL.
    #[arg(long, env = "SCANBRIEF_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Template: auto, invoice, contract, form, general, or a custom name.
    #[arg(short, long, env = "SCANBRIEF_TEMPLATE", default_value = "auto")]
    template: String,

    /// TOML file with extra `[[template]]` tables.
    #[arg(long, env = "SCANBRIEF_TEMPLATES_FILE")]
    templates_file: Option<PathBuf>,

    /// Language for the extracted values and summary.
    #[arg(long, env = "SCANBRIEF_LANGUAGE")]
    language: Option<String>,

    /// Completion length hint for the extraction call.
    #[arg(long, env = "SCANBRIEF_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// Total extraction attempts, first call included.
    #[arg(long, env = "SCANBRIEF_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Initial retry backoff in milliseconds (doubles each retry).
    #[arg(long, env = "SCANBRIEF_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-attempt timeout in seconds.
    #[arg(long, env = "SCANBRIEF_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Sampling temperature for the extraction call.
    #[arg(long, env = "SCANBRIEF_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// OCR engine: vision or tesseract.
    #[arg(long, env = "SCANBRIEF_OCR", default_value = "vision")]
    ocr: OcrBackend,

    /// Vision OCR provider: openai, gemini or another edgequake-llm provider
    /// name. Defaults to the extraction provider.
    #[arg(long, env = "SCANBRIEF_OCR_PROVIDER")]
    ocr_provider: Option<String>,

    /// Vision model for OCR.
    #[arg(long, env = "SCANBRIEF_OCR_MODEL")]
    ocr_model: Option<String>,

    /// Tesseract language code.
    #[arg(long, env = "SCANBRIEF_TESSERACT_LANG", default_value = "eng")]
    tesseract_lang: String,

    /// Rendering DPI for scanned PDF pages (72–400).
    #[arg(long, env = "SCANBRIEF_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Directory holding libpdfium.
    #[arg(long, env = "SCANBRIEF_PDFIUM_DIR")]
    pdfium_dir: Option<PathBuf>,

    /// Report layout: standard or compact.
    #[arg(long, env = "SCANBRIEF_LAYOUT", default_value = "standard")]
    layout: String,

    /// Report page size: a4 or letter.
    #[arg(long, env = "SCANBRIEF_PAGE_SIZE", default_value = "a4")]
    page_size: PageSize,

    /// Report font: helvetica, times or courier.
    #[arg(long, env = "SCANBRIEF_FONT", default_value = "helvetica")]
    font: BaseFont,

    /// Footer text on every report page.
    #[arg(long, env = "SCANBRIEF_FOOTER")]
    footer: Option<String>,

    /// Fixed timestamp printed under the report title.
    #[arg(long, env = "SCANBRIEF_GENERATED_AT")]
    generated_at: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // With the spinner active, library INFO lines would tear it; keep
    // them for `serve` and --no-progress.
    let spinner = matches!(&cli.command, Command::Analyze(a) if !a.no_progress && !a.json) && !cli.quiet;
    let filter = if cli.verbose {
        "scanbrief=debug,tower_http=debug"
    } else if cli.quiet || spinner {
        "error"
    } else {
        "scanbrief=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => {
            let config = build_config(&args.pipeline, None)?;
            let server = ServerConfig {
                host: args.host,
                port: args.port,
                upload_limit: args.upload_limit_mb.saturating_mul(1024 * 1024),
            };
            if !cli.quiet {
                eprintln!(
                    "{} scanbrief on {}",
                    green("◆"),
                    bold(&format!("http://{}", server.addr()))
                );
            }
            server::serve(&server, config).await.context("Server failed")?;
        }
        Command::Analyze(args) => {
            let progress: Option<ProgressCallback> = spinner
                .then(|| CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>);
            let config = build_config(&args.pipeline, progress)?;
            run_analyze(&args, &config, cli.quiet).await?;
        }
        Command::Templates { templates_file } => {
            let registry = load_templates(templates_file.as_ref())?;
            for t in registry.iter() {
                println!("{:<12} {}", bold(&t.name), dim(&t.title));
            }
            println!("{:<12} {}", bold("auto"), dim("detect from the document text"));
        }
    }

    Ok(())
}

async fn run_analyze(args: &AnalyzeArgs, config: &PipelineConfig, quiet: bool) -> Result<()> {
    let (output, final_path) = match &args.output {
        Some(path) => {
            let output = analyze_to_file(&args.input, path, config)
                .await
                .with_context(|| format!("Analysis of {} failed", args.input.display()))?;
            (output, path.clone())
        }
        None => {
            // The default name depends on the detected document kind.
            let output = analyze_file(&args.input, config)
                .await
                .with_context(|| format!("Analysis of {} failed", args.input.display()))?;
            let dest = PathBuf::from(&output.report.file_name);
            tokio::fs::write(&dest, &output.report.bytes)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            (output, dest)
        }
    };

    if args.json {
        let json = serde_json::to_string_pretty(&output.result).context("Failed to serialise result")?;
        println!("{json}");
    } else if !quiet {
        println!("{}", bold(&format!("{} Analysis", output.result.title)));
        for field in output.result.fields.iter().filter(|f| !f.summary) {
            let value = match &field.value {
                scanbrief::FieldValue::Text(s) => s.clone(),
                scanbrief::FieldValue::List(items) => items.join(", "),
                scanbrief::FieldValue::Table { rows, .. } => format!("{} row(s)", rows.len()),
                scanbrief::FieldValue::Absent => dim("not found"),
            };
            println!("  {:<22} {}", field.name, value);
        }
        if let Some(summary) = &output.result.summary {
            println!("\n{summary}");
        }
    }

    if !quiet {
        let s = &output.stats;
        eprintln!(
            "{}  {} page(s), {} via OCR  {}ms  →  {}",
            green("✔"),
            s.total_pages,
            s.ocr_pages,
            s.total_duration_ms,
            bold(&final_path.display().to_string()),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out  ({} attempt(s))",
            dim(&s.prompt_tokens.to_string()),
            dim(&s.completion_tokens.to_string()),
            s.llm_attempts,
        );
    }
    Ok(())
}

fn load_templates(path: Option<&PathBuf>) -> Result<TemplateRegistry> {
    let mut registry = TemplateRegistry::with_builtins();
    if let Some(path) = path {
        let n = registry
            .load_toml_file(path)
            .with_context(|| format!("Failed to load templates from {}", path.display()))?;
        tracing::info!("Loaded {} custom template(s) from {}", n, path.display());
    }
    Ok(registry)
}

/// Map CLI args to `PipelineConfig`.
fn build_config(args: &PipelineArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let templates = load_templates(args.templates_file.as_ref())?;

    let mut style = ReportStyle {
        layout: args.layout.clone(),
        page_size: args.page_size,
        font: args.font,
        generated_at: args.generated_at.clone(),
        ..ReportStyle::default()
    };
    if let Some(ref footer) = args.footer {
        style.footer = footer.clone();
    }

    let mut builder = PipelineConfig::builder()
        .credentials(Credentials::from_env())
        .provider_kind(args.provider)
        .template(args.template.clone())
        .templates(templates)
        .prompt_params(PromptParams {
            max_tokens: Some(args.max_tokens),
            target_language: args.language.clone(),
            ..PromptParams::default()
        })
        .max_attempts(args.max_attempts)
        .retry_backoff_ms(args.retry_backoff_ms)
        .api_timeout_secs(args.api_timeout)
        .temperature(args.temperature)
        .ocr_backend(args.ocr)
        .tesseract_lang(args.tesseract_lang.clone())
        .dpi(args.dpi)
        .report_style(style);

    if let Some(ref m) = args.model {
        builder = builder.model(m.clone());
    }
    if let Some(ref url) = args.api_base_url {
        builder = builder.api_base_url(url.clone());
    }
    if let Some(ref p) = args.ocr_provider {
        builder = builder.ocr_provider_name(p.clone());
    }
    if let Some(ref m) = args.ocr_model {
        builder = builder.ocr_model(m.clone());
    }
    if let Some(ref dir) = args.pdfium_dir {
        builder = builder.pdfium_lib_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
