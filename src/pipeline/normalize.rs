//! Normalisation: raw model output → [`NormalizedResult`] on a template schema.
//!
//! Models asked for JSON still wrap it in Markdown fences or a sentence of
//! prose now and then. Extraction of the JSON object is tried in order:
//!
//! 1. the whole response as JSON
//! 2. the body of an outer ```` ```json ```` fence
//! 3. the span from the first `{` to the last `}`
//!
//! The top-level value must then be an object. Every schema field appears in
//! the result, in schema order: missing, `null` and blank values become
//! [`FieldValue::Absent`]. Keys outside the schema are dropped.
//!
//! The mapping is a pure function of (response, template), so repeated
//! normalisation of the same response always yields the same result.

use crate::error::ScanbriefError;
use crate::output::{FieldValue, NormalizedField, NormalizedResult};
use crate::prompts::{FieldKind, Template};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```\s*$").unwrap());

/// Map `raw` onto `template`.
pub fn normalize(raw: &str, template: &Template) -> Result<NormalizedResult, ScanbriefError> {
    let value = parse_json(raw)?;
    let Value::Object(map) = value else {
        return Err(ScanbriefError::normalization(format!(
            "expected a JSON object, got {}",
            json_type(&value)
        )));
    };

    let dropped: Vec<&String> = map.keys().filter(|k| template.field(k).is_none()).collect();
    if !dropped.is_empty() {
        debug!("Dropping {} field(s) outside the schema: {:?}", dropped.len(), dropped);
    }

    let fields: Vec<NormalizedField> = template
        .fields
        .iter()
        .map(|spec| NormalizedField {
            name: spec.name.clone(),
            kind: spec.kind,
            summary: template.is_summary_field(&spec.name),
            value: map
                .get(&spec.name)
                .map(|v| field_value(v, spec.kind, spec.columns.iter().map(|c| c.name.as_str())))
                .unwrap_or(FieldValue::Absent),
        })
        .collect();

    let summary = template.summary_fields.iter().find_map(|name| {
        fields
            .iter()
            .find(|f| &f.name == name)
            .and_then(|f| f.value.as_text())
            .map(str::to_string)
    });

    let absent = fields.iter().filter(|f| f.value.is_absent()).count();
    debug!(
        "Normalised {} field(s) for '{}', {} absent",
        fields.len(),
        template.name,
        absent
    );

    Ok(NormalizedResult {
        template: template.name.clone(),
        title: template.title.clone(),
        fields,
        summary,
    })
}

/// Turn a result back into the JSON object shape the model is asked for.
///
/// `normalize(&to_json(r).to_string(), t) == r` for any `r` produced by
/// [`normalize`] with template `t`.
pub fn to_json(result: &NormalizedResult) -> Value {
    let mut map = Map::new();
    for field in &result.fields {
        let v = match &field.value {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
            FieldValue::Table { columns, rows } => Value::Array(
                rows.iter()
                    .map(|row| {
                        let obj: Map<String, Value> = columns
                            .iter()
                            .zip(row)
                            .filter(|(_, cell)| !cell.is_empty())
                            .map(|(c, cell)| (c.clone(), Value::String(cell.clone())))
                            .collect();
                        Value::Object(obj)
                    })
                    .collect(),
            ),
            FieldValue::Absent => Value::Null,
        };
        map.insert(field.name.clone(), v);
    }
    Value::Object(map)
}

// ── JSON recovery ────────────────────────────────────────────────────────

fn parse_json(raw: &str) -> Result<Value, ScanbriefError> {
    let trimmed = raw.trim().trim_start_matches('\u{FEFF}');
    if trimmed.is_empty() {
        return Err(ScanbriefError::normalization("model returned an empty response"));
    }

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    if let Some(caps) = RE_FENCED.captures(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Ok(v);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                debug!("Recovered JSON object embedded in prose");
                return Ok(v);
            }
        }
    }

    let excerpt: String = trimmed.chars().take(120).collect();
    Err(ScanbriefError::normalization(format!(
        "response is not valid JSON: {excerpt}"
    )))
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Value mapping ────────────────────────────────────────────────────────

fn field_value<'a>(
    v: &Value,
    kind: FieldKind,
    template_columns: impl Iterator<Item = &'a str>,
) -> FieldValue {
    match v {
        Value::Null => FieldValue::Absent,
        Value::Array(items) => array_value(items, kind, template_columns),
        other => match scalar_text(other) {
            Some(s) => FieldValue::Text(s),
            None => FieldValue::Absent,
        },
    }
}

fn array_value<'a>(
    items: &[Value],
    kind: FieldKind,
    template_columns: impl Iterator<Item = &'a str>,
) -> FieldValue {
    let objects: Vec<&Map<String, Value>> = items.iter().filter_map(Value::as_object).collect();

    if !objects.is_empty() && objects.len() == items.len() {
        return table_value(&objects, template_columns);
    }

    let list: Vec<String> = items.iter().filter_map(scalar_text).collect();
    if list.is_empty() {
        return FieldValue::Absent;
    }
    if kind == FieldKind::Text && list.len() == 1 {
        return FieldValue::Text(list.into_iter().next().unwrap_or_default());
    }
    FieldValue::List(list)
}

fn table_value<'a>(
    objects: &[&Map<String, Value>],
    template_columns: impl Iterator<Item = &'a str>,
) -> FieldValue {
    // Template columns first (when used), then any others in key order.
    let mut columns: Vec<String> = template_columns
        .filter(|c| objects.iter().any(|o| o.contains_key(*c)))
        .map(str::to_string)
        .collect();
    for obj in objects {
        for key in obj.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }

    let rows: Vec<Vec<String>> = objects
        .iter()
        .map(|obj| {
            columns
                .iter()
                .map(|c| obj.get(c).and_then(scalar_text).unwrap_or_default())
                .collect()
        })
        .filter(|row: &Vec<String>| row.iter().any(|cell| !cell.is_empty()))
        .collect();

    if rows.is_empty() {
        return FieldValue::Absent;
    }
    // Drop columns that ended up empty in every row.
    let keep: Vec<bool> = (0..columns.len())
        .map(|i| rows.iter().any(|r| !r[i].is_empty()))
        .collect();
    let columns = columns
        .into_iter()
        .zip(&keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect();
    let rows = rows
        .into_iter()
        .map(|r| {
            r.into_iter()
                .zip(&keep)
                .filter_map(|(cell, k)| k.then_some(cell))
                .collect()
        })
        .collect();

    FieldValue::Table { columns, rows }
}

/// Text form of a scalar; `None` for null or blank. Nested values become
/// compact JSON.
fn scalar_text(v: &Value) -> Option<String> {
    let s = match v {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(_) | Value::Object(_) => v.to_string(),
    };
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::TemplateRegistry;

    fn template(name: &str) -> Template {
        TemplateRegistry::with_builtins().get(name).unwrap().clone()
    }

    #[test]
    fn bare_json_invoice() {
        let raw = r#"{"invoice_number": "INV-1", "total_amount": "42.00", "currency": "USD",
            "items": [{"description": "Widget", "quantity": 2, "unit_price": "21.00", "line_total": "42.00"}],
            "summary": "Invoice from ACME for 42.00 USD."}"#;
        let r = normalize(raw, &template("invoice")).unwrap();
        assert_eq!(r.text("total_amount"), Some("42.00"));
        assert_eq!(r.summary.as_deref(), Some("Invoice from ACME for 42.00 USD."));
        match r.get("items").unwrap() {
            FieldValue::Table { columns, rows } => {
                assert_eq!(columns, &["description", "quantity", "unit_price", "line_total"]);
                assert_eq!(rows[0], vec!["Widget", "2", "21.00", "42.00"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fenced_json_is_accepted() {
        let raw = "```json\n{\"overall_summary\": \"A memo.\"}\n```";
        let r = normalize(raw, &template("general")).unwrap();
        assert_eq!(r.summary.as_deref(), Some("A memo."));
    }

    #[test]
    fn json_inside_prose_is_accepted() {
        let raw = "Sure! Here is the data: {\"document_main_topic\": \"AI\"} Hope it helps.";
        let r = normalize(raw, &template("general")).unwrap();
        assert_eq!(r.text("document_main_topic"), Some("AI"));
    }

    #[test]
    fn missing_null_and_blank_are_absent() {
        let raw = r#"{"invoice_number": null, "vendor_name": "   ", "total_amount": "42.00"}"#;
        let r = normalize(raw, &template("invoice")).unwrap();
        assert!(r.get("invoice_number").unwrap().is_absent());
        assert!(r.get("vendor_name").unwrap().is_absent());
        assert!(r.get("date").unwrap().is_absent());
        assert!(r.get("items").unwrap().is_absent());
        assert_eq!(r.fields.len(), template("invoice").fields.len());
        assert_eq!(r.summary, None);
    }

    #[test]
    fn unknown_fields_dropped() {
        let raw = r#"{"total_amount": "1.00", "favourite_colour": "blue"}"#;
        let r = normalize(raw, &template("invoice")).unwrap();
        assert!(r.get("favourite_colour").is_none());
    }

    #[test]
    fn non_object_top_level_fails() {
        for raw in ["[1, 2, 3]", "\"just a string\"", "42"] {
            let err = normalize(raw, &template("general")).unwrap_err();
            assert!(matches!(err, ScanbriefError::Normalization { .. }), "{raw}");
        }
    }

    #[test]
    fn garbage_fails() {
        let err = normalize("I could not read the document.", &template("general")).unwrap_err();
        assert!(matches!(err, ScanbriefError::Normalization { .. }));
        assert!(normalize("   ", &template("general")).is_err());
    }

    #[test]
    fn lists_and_numbers() {
        let raw = r#"{"parties": ["Acme", "", null, "Globex"], "contract_title": 7,
            "overall_summary": "Deal.", "key_clauses_summary": "Clauses."}"#;
        let r = normalize(raw, &template("contract")).unwrap();
        assert_eq!(
            r.get("parties").unwrap(),
            &FieldValue::List(vec!["Acme".into(), "Globex".into()])
        );
        assert_eq!(r.text("contract_title"), Some("7"));
        // overall_summary outranks key_clauses_summary
        assert_eq!(r.summary.as_deref(), Some("Deal."));
    }

    #[test]
    fn summary_falls_back_in_priority_order() {
        let raw = r#"{"overall_summary": null, "key_clauses_summary": "Clauses."}"#;
        let r = normalize(raw, &template("contract")).unwrap();
        assert_eq!(r.summary.as_deref(), Some("Clauses."));
    }

    #[test]
    fn schema_order_is_preserved() {
        let raw = r#"{"summary": "s", "invoice_number": "1"}"#;
        let r = normalize(raw, &template("invoice")).unwrap();
        let names: Vec<&str> = r.fields.iter().map(|f| f.name.as_str()).collect();
        let t = template("invoice");
        let expected: Vec<&str> = t.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn normalisation_is_idempotent() {
        let raw = r#"```json
{"invoice_number": "INV-9", "total_amount": 42.5, "extra": 1,
 "items": [{"line_total": "1.00", "description": "A", "sku": "X1"}, {"description": "B"}],
 "summary": "ok"}
```"#;
        let t = template("invoice");
        let first = normalize(raw, &t).unwrap();
        let again = normalize(raw, &t).unwrap();
        assert_eq!(first, again);
        let reparsed = normalize(&to_json(&first).to_string(), &t).unwrap();
        assert_eq!(first, reparsed);
    }
}
