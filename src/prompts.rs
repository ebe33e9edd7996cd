//! Prompt catalogue: extraction templates and the vision OCR system prompt.
//!
//! Every prompt string lives here so that changing what the model is asked
//! for never touches retry, parsing or rendering code. A [`Template`] pairs
//! the instructions with a field schema; the same schema later drives
//! normalisation and the report layout.
//!
//! Custom templates can be registered in code or loaded from TOML:
//!
//! ```toml
//! [[template]]
//! name = "receipt"
//! title = "Receipt"
//! intro = "You are an expert at reading shop receipts."
//! summary_fields = ["summary"]
//!
//! [[template.fields]]
//! name = "merchant"
//! description = "string | null"
//!
//! [[template.fields]]
//! name = "summary"
//! description = "One sentence describing the purchase."
//! ```

use crate::error::ScanbriefError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Template name that asks the pipeline to pick a template from the text.
pub const AUTO_TEMPLATE: &str = "auto";

/// System prompt for vision OCR of a single page image.
pub const OCR_SYSTEM_PROMPT: &str = r#"You are a precise OCR engine. Transcribe the text in the page image exactly as printed.

Follow these rules precisely:

1. TEXT PRESERVATION
   - Transcribe ALL visible text, including numbers, amounts, dates and identifiers
   - Keep the reading order a human would use
   - Do not correct spelling, translate, or summarise

2. LAYOUT
   - One line of output per printed line
   - Separate table cells with " | " and keep each table row on one line
   - Keep a blank line between visually separate blocks

3. WHAT TO IGNORE
   - Decorative borders, logos without text, and background patterns

4. OUTPUT FORMAT
   - Output ONLY the transcribed text
   - Do NOT wrap it in code fences
   - Do NOT add commentary
   - If the page contains no text, output nothing"#;

// ── Schema types ─────────────────────────────────────────────────────────

/// Shape a field is expected to take in the model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// A scalar rendered as text.
    #[default]
    Text,
    /// An array of scalars.
    List,
    /// An array of objects (line items).
    Table,
}

/// A column of a [`FieldKind::Table`] field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub description: String,
}

/// One field the model is asked to fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Type hint shown to the model, e.g. `string (YYYY-MM-DD format) | null`.
    pub description: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnSpec>,
}

impl FieldSpec {
    pub fn text(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind: FieldKind::Text,
            columns: Vec::new(),
        }
    }

    pub fn list(name: &str, description: &str) -> Self {
        Self {
            kind: FieldKind::List,
            ..Self::text(name, description)
        }
    }

    pub fn table(name: &str, columns: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            kind: FieldKind::Table,
            columns: columns
                .iter()
                .map(|(n, d)| ColumnSpec {
                    name: n.to_string(),
                    description: d.to_string(),
                })
                .collect(),
        }
    }
}

/// An extraction template: instructions plus field schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    /// Document kind shown in the report title, e.g. `Invoice`.
    pub title: String,
    /// Opening role sentence of the prompt.
    pub intro: String,
    /// Extra guidance placed after the schema.
    #[serde(default)]
    pub instructions: Option<String>,
    pub fields: Vec<FieldSpec>,
    /// Fields holding summary text, highest priority first.
    #[serde(default)]
    pub summary_fields: Vec<String>,
}

impl Template {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_summary_field(&self, name: &str) -> bool {
        self.summary_fields.iter().any(|s| s == name)
    }

    /// The expected-output JSON sketch embedded in the prompt.
    pub fn schema_sketch(&self) -> String {
        let mut out = String::from("{\n");
        for (i, field) in self.fields.iter().enumerate() {
            let value = match field.kind {
                FieldKind::Table => {
                    let cols = field
                        .columns
                        .iter()
                        .map(|c| format!("            \"{}\": \"{}\"", c.name, c.description))
                        .collect::<Vec<_>>()
                        .join(",\n");
                    format!("[\n        {{\n{cols}\n        }}\n    ]")
                }
                FieldKind::Text | FieldKind::List => format!("\"{}\"", field.description),
            };
            let comma = if i + 1 < self.fields.len() { "," } else { "" };
            out.push_str(&format!("    \"{}\": {}{}\n", field.name, value, comma));
        }
        out.push('}');
        out
    }

    fn validate(&self) -> Result<(), ScanbriefError> {
        if self.name.trim().is_empty() || self.name == AUTO_TEMPLATE {
            return Err(ScanbriefError::InvalidConfig(format!(
                "invalid template name '{}'",
                self.name
            )));
        }
        if self.fields.is_empty() {
            return Err(ScanbriefError::InvalidConfig(format!(
                "template '{}' declares no fields",
                self.name
            )));
        }
        if let Some(missing) = self
            .summary_fields
            .iter()
            .find(|s| self.field(s).is_none())
        {
            return Err(ScanbriefError::InvalidConfig(format!(
                "template '{}' lists summary field '{missing}' that is not in its schema",
                self.name
            )));
        }
        Ok(())
    }
}

// ── Built-in templates ───────────────────────────────────────────────────

fn invoice_template() -> Template {
    Template {
        name: "invoice".into(),
        title: "Invoice".into(),
        intro: "You are an expert at extracting structured information from invoices.".into(),
        instructions: None,
        fields: vec![
            FieldSpec::text("invoice_number", "string | null"),
            FieldSpec::text("date", "string (YYYY-MM-DD format) | null"),
            FieldSpec::text("vendor_name", "string | null"),
            FieldSpec::text("customer_name", "string | null"),
            FieldSpec::text("total_amount", "string (e.g., '123.45') | null"),
            FieldSpec::text("currency", "string (e.g., 'USD', 'EUR') | null"),
            FieldSpec::table(
                "items",
                &[
                    ("description", "string | null"),
                    ("quantity", "number | null"),
                    ("unit_price", "string (e.g., '10.00') | null"),
                    ("line_total", "string (e.g., '100.00') | null"),
                ],
            ),
            FieldSpec::text("payment_terms", "string | null"),
            FieldSpec::text(
                "summary",
                "A concise, one-sentence summary of the invoice, including vendor, total, and purpose.",
            ),
        ],
        summary_fields: vec!["summary".into()],
    }
}

fn contract_template() -> Template {
    Template {
        name: "contract".into(),
        title: "Contract".into(),
        intro: "You are an expert at extracting key information and summarizing legal contracts."
            .into(),
        instructions: None,
        fields: vec![
            FieldSpec::text("contract_title", "string | null"),
            FieldSpec::list("parties", "array of strings (names of parties involved) | null"),
            FieldSpec::text("effective_date", "string (YYYY-MM-DD format) | null"),
            FieldSpec::text("termination_date", "string (YYYY-MM-DD format) | null"),
            FieldSpec::text("governing_law", "string | null"),
            FieldSpec::text(
                "key_clauses_summary",
                "A brief summary (2-3 sentences) of the most important clauses (e.g., scope of work, payment terms, liability, intellectual property).",
            ),
            FieldSpec::text(
                "overall_summary",
                "A one-paragraph overall summary of the contract's purpose, main agreements, and duration.",
            ),
        ],
        summary_fields: vec!["overall_summary".into(), "key_clauses_summary".into()],
    }
}

fn form_template() -> Template {
    Template {
        name: "form".into(),
        title: "Form".into(),
        intro: "You are an expert at extracting information from various forms.".into(),
        instructions: Some(
            "Identify common form fields like Name, Address, Phone, Email and Date of Birth. \
             Use `null` for any field the form does not contain."
                .into(),
        ),
        fields: vec![
            FieldSpec::text(
                "form_type",
                "string (e.g., 'Application Form', 'Registration Form') | null",
            ),
            FieldSpec::text("applicant_name", "string | null"),
            FieldSpec::text("address", "string | null"),
            FieldSpec::text("phone_number", "string | null"),
            FieldSpec::text("email", "string | null"),
            FieldSpec::text("date_of_birth", "string (YYYY-MM-DD format) | null"),
            FieldSpec::text("purpose_of_form", "string | null"),
            FieldSpec::text("summary", "A concise summary of the form's content and purpose."),
        ],
        summary_fields: vec!["summary".into()],
    }
}

fn general_template() -> Template {
    Template {
        name: "general".into(),
        title: "Document".into(),
        intro: "You are a highly intelligent assistant capable of understanding and summarizing any document.".into(),
        instructions: None,
        fields: vec![
            FieldSpec::text("document_main_topic", "string | null"),
            FieldSpec::list(
                "key_entities",
                "array of strings (important names, places, dates, concepts) | null",
            ),
            FieldSpec::list(
                "main_points",
                "array of strings (bullet points of key takeaways) | null",
            ),
            FieldSpec::text(
                "overall_summary",
                "A one-paragraph comprehensive summary of the document's content and purpose.",
            ),
        ],
        summary_fields: vec!["overall_summary".into()],
    }
}

// ── Kind detection ───────────────────────────────────────────────────────

static RE_INVOICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(invoices?|bill(s|ed|ing)?)\b").unwrap());
static RE_CONTRACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(contracts?|agreements?|terms\s+and\s+conditions)\b").unwrap()
});
static RE_FORM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(forms?|application)\b").unwrap());

/// Pick a built-in template name from keywords in the text.
///
/// Checked in order: invoice, contract, form; anything else is `general`.
/// Keywords match whole words only, so "billion" is not a bill and
/// "platform" is not a form.
pub fn detect_template(text: &str) -> &'static str {
    if RE_INVOICE.is_match(text) {
        "invoice"
    } else if RE_CONTRACT.is_match(text) {
        "contract"
    } else if RE_FORM.is_match(text) {
        "form"
    } else {
        "general"
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default, rename = "template")]
    templates: Vec<Template>,
}

/// Named templates available to a pipeline.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Template>,
}

impl TemplateRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `invoice`, `contract`, `form` and `general`.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        for t in [
            invoice_template(),
            contract_template(),
            form_template(),
            general_template(),
        ] {
            reg.templates.insert(t.name.clone(), t);
        }
        reg
    }

    /// Add or replace a template.
    pub fn register(&mut self, template: Template) -> Result<(), ScanbriefError> {
        template.validate()?;
        debug!("Registered template '{}'", template.name);
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    /// Register every `[[template]]` table in a TOML document.
    pub fn load_toml_str(&mut self, toml_src: &str) -> Result<usize, ScanbriefError> {
        let file: TemplateFile = toml::from_str(toml_src)
            .map_err(|e| ScanbriefError::InvalidConfig(format!("template file: {e}")))?;
        let count = file.templates.len();
        for t in file.templates {
            self.register(t)?;
        }
        Ok(count)
    }

    /// Register every template in the TOML file at `path`.
    pub fn load_toml_file(&mut self, path: &Path) -> Result<usize, ScanbriefError> {
        let src = std::fs::read_to_string(path).map_err(|e| ScanbriefError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let count = self.load_toml_str(&src)?;
        info!("Loaded {} template(s) from {}", count, path.display());
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Result<&Template, ScanbriefError> {
        self.templates
            .get(name)
            .ok_or_else(|| ScanbriefError::TemplateNotFound {
                name: name.to_string(),
                known: self.names().join(", "),
            })
    }

    /// Resolve `name`, treating [`AUTO_TEMPLATE`] as a request to detect from `text`.
    pub fn resolve(&self, name: &str, text: &str) -> Result<&Template, ScanbriefError> {
        if name == AUTO_TEMPLATE {
            let detected = detect_template(text);
            debug!("Auto-detected template '{}'", detected);
            self.get(detected)
        } else {
            self.get(name)
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }
}
