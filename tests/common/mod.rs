//! Shared fixtures: tiny documents, a scripted OCR engine and LLM provider.
#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};
use scanbrief::{
    LlmProvider, LlmResponse, OcrEngine, PipelineConfig, PipelineConfigBuilder,
    PipelineProgressCallback, Prompt, QueryOptions, ScanbriefError, Stage, StageFailure,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

// ── Documents ────────────────────────────────────────────────────────────

/// A small white JPEG. Its content does not matter; OCR is faked.
pub fn jpeg_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(32, 24, image::Rgb([250, 250, 250]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .unwrap();
    buf
}

/// A PDF whose pages carry the given text layers.
pub fn text_pdf(texts: &[&str]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let mut kids: Vec<Object> = Vec::new();
    for text in texts {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

// ── OCR ──────────────────────────────────────────────────────────────────

/// Returns fixed text for every page.
pub struct FakeOcr {
    pub text: String,
    pub calls: AtomicU32,
}

impl FakeOcr {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    fn name(&self) -> &str {
        "fake-ocr"
    }

    async fn recognize(&self, png: &[u8]) -> Result<String, ScanbriefError> {
        assert!(png.starts_with(b"\x89PNG"), "OCR engines receive PNG bytes");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

// ── LLM ──────────────────────────────────────────────────────────────────

/// One scripted provider outcome.
pub enum Step {
    Answer(String),
    Fail(ScanbriefError),
    /// Never answers; only a timeout or cancellation ends the call.
    Hang,
}

/// Replays a script; the last step repeats once the script runs out.
pub struct FakeLlm {
    script: Mutex<Vec<Step>>,
    pub calls: AtomicU32,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn answering(json: &str) -> Arc<Self> {
        Self::new(vec![Step::Answer(json.to_string())])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LlmProvider for FakeLlm {
    fn name(&self) -> &str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-1"
    }

    async fn query(&self, prompt: &Prompt, _options: &QueryOptions) -> Result<LlmResponse, ScanbriefError> {
        self.play(&prompt.text).await
    }

    async fn transcribe(
        &self,
        instructions: &str,
        png: &[u8],
        _options: &QueryOptions,
    ) -> Result<LlmResponse, ScanbriefError> {
        assert!(png.starts_with(b"\x89PNG"), "vision OCR receives PNG bytes");
        self.play(instructions).await
    }
}

impl FakeLlm {
    async fn play(&self, text: &str) -> Result<LlmResponse, ScanbriefError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(text.to_string());
        let step = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                Some(script.remove(0))
            } else {
                None
            }
        };
        let step = match step {
            Some(s) => s,
            None => match self.script.lock().unwrap().first() {
                Some(Step::Answer(s)) => Step::Answer(s.clone()),
                Some(Step::Fail(e)) => Step::Fail(clone_error(e)),
                Some(Step::Hang) | None => Step::Hang,
            },
        };
        match step {
            Step::Answer(content) => Ok(LlmResponse::new(content, "fake", "fake-1")),
            Step::Fail(e) => Err(e),
            Step::Hang => std::future::pending().await,
        }
    }
}

fn clone_error(e: &ScanbriefError) -> ScanbriefError {
    match e {
        ScanbriefError::Auth { provider, detail } => ScanbriefError::Auth {
            provider: provider.clone(),
            detail: detail.clone(),
        },
        ScanbriefError::TransientService {
            provider,
            attempts,
            detail,
        } => ScanbriefError::TransientService {
            provider: provider.clone(),
            attempts: *attempts,
            detail: detail.clone(),
        },
        ScanbriefError::ResponseFormat { provider, detail } => ScanbriefError::ResponseFormat {
            provider: provider.clone(),
            detail: detail.clone(),
        },
        other => ScanbriefError::Internal(other.to_string()),
    }
}

pub fn auth_error() -> ScanbriefError {
    ScanbriefError::Auth {
        provider: "fake".into(),
        detail: "HTTP 401: invalid api key".into(),
    }
}

// ── Progress ─────────────────────────────────────────────────────────────

/// Records every event as a short string.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl PipelineProgressCallback for Recorder {
    fn on_stage_start(&self, stage: Stage) {
        self.events.lock().unwrap().push(format!("start:{stage}"));
    }
    fn on_stage_complete(&self, stage: Stage) {
        self.events.lock().unwrap().push(format!("done:{stage}"));
    }
    fn on_retry(&self, attempt: u32, _backoff_ms: u64, _reason: &str) {
        self.events.lock().unwrap().push(format!("retry:{attempt}"));
    }
    fn on_failed(&self, failure: &StageFailure) {
        self.events
            .lock()
            .unwrap()
            .push(format!("failed:{}:{}", failure.stage, failure.kind().label()));
    }
    fn on_done(&self, _report_len: usize) {
        self.events.lock().unwrap().push("finished".into());
    }
}

// ── Config ───────────────────────────────────────────────────────────────

pub const INVOICE_JSON: &str = r#"{
    "invoice_number": "INV-0042",
    "date": "2024-03-01",
    "vendor_name": "Acme Supplies",
    "customer_name": "Globex",
    "total_amount": "42.00",
    "currency": "USD",
    "items": [
        {"description": "Widget", "quantity": 2, "unit_price": "21.00", "line_total": "42.00"}
    ],
    "payment_terms": "Net 30",
    "summary": "Invoice INV-0042 from Acme Supplies for 42.00 USD."
}"#;

/// Fast retries and injected fakes; no credentials needed.
pub fn builder(ocr: Arc<FakeOcr>, llm: Arc<FakeLlm>) -> PipelineConfigBuilder {
    PipelineConfig::builder()
        .ocr_engine(ocr)
        .provider(llm)
        .retry_backoff_ms(1)
}

pub fn config(ocr: Arc<FakeOcr>, llm: Arc<FakeLlm>) -> PipelineConfig {
    builder(ocr, llm).build().unwrap()
}
