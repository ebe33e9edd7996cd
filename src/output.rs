//! Values that flow between pipeline stages, and the final run output.

use crate::prompts::FieldKind;
use serde::{Deserialize, Serialize};

// ── Extraction ───────────────────────────────────────────────────────────

/// How a page's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// Read from the PDF's embedded text layer.
    TextLayer,
    /// Produced by the OCR engine from a page image.
    Ocr,
}

/// Text of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-indexed page number.
    pub page_num: usize,
    pub text: String,
    pub source: TextSource,
}

/// Per-page text of a document, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub pages: Vec<PageText>,
}

impl ExtractedText {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// True when no page carries any non-whitespace text.
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }

    /// All pages joined with a blank line.
    pub fn joined(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.trim())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Number of pages that went through OCR.
    pub fn ocr_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.source == TextSource::Ocr)
            .count()
    }
}

// ── Prompt / LLM ─────────────────────────────────────────────────────────

/// A fully rendered extraction prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Name of the template that produced this prompt (never `"auto"`).
    pub template: String,
    pub text: String,
    /// Completion length hint forwarded to the provider.
    pub max_tokens: Option<usize>,
}

/// Raw answer of the extraction call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

impl LlmResponse {
    /// A response with only content set; used by providers before the
    /// client stamps the attempt count.
    pub fn new(content: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            provider: provider.into(),
            model: model.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
            attempts: 1,
        }
    }
}

// ── Normalised result ────────────────────────────────────────────────────

/// One normalised field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    /// Array of objects; `columns` in first-seen order.
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    /// Missing, null or blank in the model output.
    Absent,
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A named field in template order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedField {
    pub name: String,
    /// Shape declared by the template.
    pub kind: FieldKind,
    /// Listed among the template's summary fields.
    pub summary: bool,
    pub value: FieldValue,
}

/// The model output mapped onto a template schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedResult {
    /// Template name, e.g. `invoice`.
    pub template: String,
    /// Human title of the document kind, e.g. `Invoice`.
    pub title: String,
    /// Every schema field, summary fields included, in schema order.
    pub fields: Vec<NormalizedField>,
    /// Summary resolved from the template's summary priority list.
    pub summary: Option<String>,
}

impl NormalizedResult {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Text value of `name`, if present and textual.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }
}

// ── Report ───────────────────────────────────────────────────────────────

/// A rendered PDF report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub bytes: Vec<u8>,
    /// Suggested download name, e.g. `invoice_analysis_summary.pdf`.
    pub file_name: String,
}

/// Statistics about a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_pages: usize,
    pub ocr_pages: usize,
    pub extracted_chars: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub llm_attempts: u32,
    pub report_bytes: usize,
    pub total_duration_ms: u64,
    pub extract_duration_ms: u64,
    pub llm_duration_ms: u64,
}

/// Everything a successful run produces.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub result: NormalizedResult,
    pub report: Report,
    pub extracted: ExtractedText,
    pub stats: RunStats,
}
