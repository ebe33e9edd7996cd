//! Prompt construction: ExtractedText + template → Prompt.

use crate::error::ScanbriefError;
use crate::output::{ExtractedText, Prompt};
use crate::prompts::{Template, TemplateRegistry};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const TRUNCATION_MARKER: &str = "\n[... text truncated ...]";

/// Knobs applied on top of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptParams {
    /// Completion length hint for the extraction call. Default: 2048.
    pub max_tokens: Option<usize>,
    /// Language for free-text values (summaries). None keeps the document's language.
    pub target_language: Option<String>,
    /// Longest document text sent, in chars. Default: 60 000.
    pub max_input_chars: Option<usize>,
}

impl Default for PromptParams {
    fn default() -> Self {
        Self {
            max_tokens: Some(2048),
            target_language: None,
            max_input_chars: Some(60_000),
        }
    }
}

/// Build the extraction prompt for `text` with the named template.
///
/// `"auto"` picks a built-in template from keywords in the text.
pub fn build_prompt(
    text: &ExtractedText,
    template_name: &str,
    params: &PromptParams,
    registry: &TemplateRegistry,
) -> Result<Prompt, ScanbriefError> {
    let joined = text.joined();
    let template = registry.resolve(template_name, &joined)?;
    let body = match params.max_input_chars {
        Some(max) => truncate_chars(&joined, max),
        None => joined,
    };

    let rendered = render(template, &body, params);
    debug!(
        "Prompt for template '{}': {} chars",
        template.name,
        rendered.len()
    );

    Ok(Prompt {
        template: template.name.clone(),
        text: rendered,
        max_tokens: params.max_tokens,
    })
}

fn render(template: &Template, body: &str, params: &PromptParams) -> String {
    let subject = template.title.to_lowercase();
    let mut out = String::with_capacity(body.len() + 1024);

    out.push_str(&template.intro);
    out.push_str(&format!(
        "\nYour task is to extract the following entities from the provided {subject} text \
         and present them in a JSON format.\n\
         Ensure the JSON is valid and complete. If a field is not found, set its value to `null`.\n\n"
    ));
    out.push_str("Expected JSON Schema:\n```json\n");
    out.push_str(&template.schema_sketch());
    out.push_str("\n```\n");

    if let Some(ref extra) = template.instructions {
        out.push('\n');
        out.push_str(extra.trim());
        out.push('\n');
    }
    if let Some(ref lang) = params.target_language {
        out.push_str(&format!(
            "\nWrite every free-text value (summaries, descriptions) in {lang}. \
             Keep names, numbers, amounts and dates exactly as printed.\n"
        ));
    }

    out.push_str(&format!("\n{} Text:\n---\n", template.title));
    out.push_str(body);
    out.push_str("\n---\n\nPlease provide only the JSON output.");
    out
}

/// Cut `text` to at most `max` chars on a char boundary, appending a marker.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        None => text.to_string(),
        Some((byte_idx, _)) => {
            warn!(
                "Document text truncated to {} chars (was {})",
                max,
                text.chars().count()
            );
            let mut cut = text[..byte_idx].to_string();
            cut.push_str(TRUNCATION_MARKER);
            cut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{PageText, TextSource};

    fn text(s: &str) -> ExtractedText {
        ExtractedText {
            pages: vec![PageText {
                page_num: 1,
                text: s.to_string(),
                source: TextSource::Ocr,
            }],
        }
    }

    #[test]
    fn invoice_prompt_contains_schema_and_text() {
        let reg = TemplateRegistry::with_builtins();
        let p = build_prompt(
            &text("ACME\nTotal: $42.00"),
            "invoice",
            &PromptParams::default(),
            &reg,
        )
        .unwrap();
        assert_eq!(p.template, "invoice");
        assert!(p.text.contains("\"total_amount\""));
        assert!(p.text.contains("Total: $42.00"));
        assert!(p.text.contains("Invoice Text:"));
        assert!(p.text.ends_with("Please provide only the JSON output."));
        assert_eq!(p.max_tokens, Some(2048));
    }

    #[test]
    fn auto_detects_template() {
        let reg = TemplateRegistry::with_builtins();
        let p = build_prompt(
            &text("INVOICE #7"),
            "auto",
            &PromptParams::default(),
            &reg,
        )
        .unwrap();
        assert_eq!(p.template, "invoice");
    }

    #[test]
    fn unknown_template_fails() {
        let reg = TemplateRegistry::with_builtins();
        let err = build_prompt(&text("x"), "receipt", &PromptParams::default(), &reg).unwrap_err();
        assert!(matches!(err, ScanbriefError::TemplateNotFound { .. }));
    }

    #[test]
    fn target_language_is_requested() {
        let reg = TemplateRegistry::with_builtins();
        let params = PromptParams {
            target_language: Some("French".into()),
            ..Default::default()
        };
        let p = build_prompt(&text("agreement"), "contract", &params, &reg).unwrap();
        assert!(p.text.contains("in French"));
    }

    #[test]
    fn truncates_on_char_boundary() {
        let out = truncate_chars("héllo wörld", 4);
        assert!(out.starts_with("héll"));
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn long_text_is_truncated_in_prompt() {
        let reg = TemplateRegistry::with_builtins();
        let params = PromptParams {
            max_input_chars: Some(10),
            ..Default::default()
        };
        let p = build_prompt(&text(&"a".repeat(100)), "general", &params, &reg).unwrap();
        assert!(p.text.contains("text truncated"));
        assert!(!p.text.contains(&"a".repeat(11)));
    }
}
