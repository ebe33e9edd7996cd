//! End-to-end tests against the real extraction APIs.
//!
//! Live tests are gated behind `E2E_ENABLED` plus the provider's API key so
//! they never run in CI by accident. Scanned fixtures are read from
//! `./test_cases/` when present; text-layer PDFs are generated on the fly.
//!
//! Run with:
//!   E2E_ENABLED=1 OPENAI_API_KEY=... cargo test --test e2e -- --nocapture
//!
//! To restrict to one test:
//!   E2E_ENABLED=1 cargo test --test e2e live_openai_invoice -- --nocapture

mod common;

use common::text_pdf;
use scanbrief::{
    analyze_to_file, Credentials, Document, FieldValue, NoopProgressCallback, Pipeline,
    PipelineConfig, PipelineProgressCallback, ProviderKind, Stage, CancellationToken,
};
use std::path::PathBuf;
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir() -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip unless E2E_ENABLED and the given key variable are set.
macro_rules! e2e_skip_unless_ready {
    ($key_env:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        if std::env::var($key_env).map(|v| v.is_empty()).unwrap_or(true) {
            println!("SKIP — {} is not set", $key_env);
            return;
        }
    }};
}

/// Skip unless the fixture exists; evaluates to its path.
macro_rules! fixture_or_skip {
    ($name:expr) => {{
        let p: PathBuf = test_cases_dir().join($name);
        if !p.exists() {
            println!("SKIP — test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// Assert the report is a well-formed PDF with at least one page.
fn assert_report_quality(bytes: &[u8], context: &str) {
    assert!(bytes.starts_with(b"%PDF-"), "[{context}] missing PDF header");
    let tail = String::from_utf8_lossy(&bytes[bytes.len().saturating_sub(32)..]);
    assert!(tail.contains("%%EOF"), "[{context}] missing %%EOF trailer");

    let doc = lopdf::Document::load_mem(bytes).expect("report must parse");
    assert!(!doc.get_pages().is_empty(), "[{context}] report has no pages");
    println!("[{context}] ✓  {} bytes, {} page(s)", bytes.len(), doc.get_pages().len());
}

fn live_config(kind: ProviderKind) -> PipelineConfig {
    PipelineConfig::builder()
        .provider_kind(kind)
        .credentials(Credentials::from_env())
        .build()
        .expect("valid config")
}

async fn pdf_doc(pages: &[&str]) -> Document {
    Document::from_upload_async(text_pdf(pages), Some("application/pdf".into()), None)
        .await
        .expect("generated PDF is valid")
}

const INVOICE_PAGE: &str =
    "INVOICE INV-2024-117  Date: 2024-05-02  From: Northwind Traders  To: Contoso Ltd  \
     2 x Desk lamp @ 35.00 = 70.00  1 x Chair @ 129.50 = 129.50  Total due: 199.50 EUR  \
     Payment terms: Net 30";

const CONTRACT_PAGE: &str =
    "SERVICE AGREEMENT between Fabrikam Inc and Litware LLC, effective 2024-01-15. \
     Fabrikam will provide managed hosting for twelve months. This agreement is governed \
     by the laws of the State of New York.";

// ── Structural tests (no API calls, always run) ──────────────────────────────

#[test]
fn noop_callback_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<NoopProgressCallback>();

    let cb: Arc<dyn PipelineProgressCallback> = Arc::new(NoopProgressCallback);
    cb.on_stage_start(Stage::Extracting);
    cb.on_retry(1, 500, "HTTP 503");
}

#[tokio::test]
async fn callback_can_move_into_spawned_task() {
    use std::sync::Mutex;

    struct StageLog {
        log: Arc<Mutex<Vec<Stage>>>,
    }

    impl PipelineProgressCallback for StageLog {
        fn on_stage_start(&self, stage: Stage) {
            self.log.lock().unwrap().push(stage);
        }
    }

    let log = Arc::new(Mutex::new(vec![]));
    let cb: Arc<dyn PipelineProgressCallback> = Arc::new(StageLog { log: log.clone() });

    tokio::spawn(async move {
        cb.on_stage_start(Stage::Querying);
    })
    .await
    .expect("spawn must succeed");

    assert_eq!(*log.lock().unwrap(), vec![Stage::Querying]);
}

#[test]
fn pipeline_is_send_and_clone() {
    fn assert_send_sync_clone<T: Send + Sync + Clone>() {}
    assert_send_sync_clone::<Pipeline>();
}

// ── Live: OpenAI ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_openai_invoice() {
    e2e_skip_unless_ready!("OPENAI_API_KEY");

    let output = Pipeline::new(live_config(ProviderKind::OpenAi))
        .run(pdf_doc(&[INVOICE_PAGE]).await, &CancellationToken::new())
        .await
        .expect("analysis should succeed");

    assert_eq!(output.result.template, "invoice");
    let total = output.result.text("total_amount").unwrap_or_default();
    assert!(total.contains("199.5"), "unexpected total {total:?}");
    assert!(
        matches!(output.result.get("items"), Some(FieldValue::Table { rows, .. }) if rows.len() == 2),
        "expected two line items, got {:?}",
        output.result.get("items")
    );
    assert!(output.stats.prompt_tokens > 0, "should have consumed tokens");
    assert_report_quality(&output.report.bytes, "openai_invoice");

    let out_path = output_dir().join(&output.report.file_name);
    std::fs::write(&out_path, &output.report.bytes).ok();
    println!("[openai_invoice] Saved to {}", out_path.display());
    println!(
        "[openai_invoice] Tokens: {} in / {} out, {} attempt(s)",
        output.stats.prompt_tokens, output.stats.completion_tokens, output.stats.llm_attempts
    );
}

#[tokio::test]
async fn live_openai_summary_in_target_language() {
    e2e_skip_unless_ready!("OPENAI_API_KEY");

    let config = PipelineConfig::builder()
        .credentials(Credentials::from_env())
        .template("contract")
        .target_language("French")
        .build()
        .expect("valid config");

    let output = Pipeline::new(config)
        .run(pdf_doc(&[CONTRACT_PAGE]).await, &CancellationToken::new())
        .await
        .expect("analysis should succeed");

    let summary = output.result.summary.clone().unwrap_or_default();
    assert!(!summary.is_empty(), "contract summary should be present");
    println!("[openai_french] summary: {summary}");
    assert_report_quality(&output.report.bytes, "openai_french");
}

#[tokio::test]
async fn live_openai_bad_key_is_auth() {
    e2e_skip_unless_ready!("OPENAI_API_KEY");

    let config = PipelineConfig::builder()
        .credentials(Credentials::default().with_openai_key("sk-invalid-key-for-tests"))
        .build()
        .expect("valid config");

    let failure = Pipeline::new(config)
        .run(pdf_doc(&[INVOICE_PAGE]).await, &CancellationToken::new())
        .await
        .expect_err("a bad key must fail");
    assert_eq!(failure.stage, Stage::Querying);
    assert_eq!(failure.kind(), scanbrief::ErrorKind::Auth);
}

/// Scanned invoice through vision OCR. Needs `test_cases/invoice_scan.jpg`.
#[tokio::test]
async fn live_openai_scanned_invoice() {
    e2e_skip_unless_ready!("OPENAI_API_KEY");
    let input = fixture_or_skip!("invoice_scan.jpg");
    let out_path = output_dir().join("invoice_scan_brief.pdf");

    let output = analyze_to_file(&input, &out_path, &live_config(ProviderKind::OpenAi))
        .await
        .expect("analysis should succeed");

    assert_eq!(output.stats.ocr_pages, 1);
    assert!(output.stats.extracted_chars > 20, "OCR text suspiciously short");
    assert_report_quality(&std::fs::read(&out_path).unwrap(), "openai_scan");
}

// ── Live: Gemini ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_gemini_contract() {
    e2e_skip_unless_ready!("GOOGLE_API_KEY");

    let output = Pipeline::new(live_config(ProviderKind::Gemini))
        .run(pdf_doc(&[CONTRACT_PAGE]).await, &CancellationToken::new())
        .await
        .expect("analysis should succeed");

    assert_eq!(output.result.template, "contract");
    match output.result.get("parties") {
        Some(FieldValue::List(parties)) => {
            assert!(parties.iter().any(|p| p.contains("Fabrikam")), "{parties:?}");
        }
        other => panic!("expected a list of parties, got {other:?}"),
    }
    let law = output.result.text("governing_law").unwrap_or_default();
    assert!(law.contains("New York"), "unexpected governing law {law:?}");
    assert_report_quality(&output.report.bytes, "gemini_contract");

    let out_path = output_dir().join(&output.report.file_name);
    std::fs::write(&out_path, &output.report.bytes).ok();
}

/// Multi-page scanned PDF (pdfium + vision OCR). Needs `test_cases/form_scan.pdf`.
#[tokio::test]
async fn live_gemini_scanned_form() {
    e2e_skip_unless_ready!("GOOGLE_API_KEY");
    let input = fixture_or_skip!("form_scan.pdf");

    let config = PipelineConfig::builder()
        .provider_kind(ProviderKind::Gemini)
        .credentials(Credentials::from_env())
        .template("form")
        .build()
        .expect("valid config");

    let output = scanbrief::analyze_file(&input, &config)
        .await
        .expect("analysis should succeed");

    assert!(output.stats.ocr_pages >= 1);
    assert_eq!(output.result.template, "form");
    assert_report_quality(&output.report.bytes, "gemini_form");
}
