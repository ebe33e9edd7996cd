//! Report rendering: [`NormalizedResult`] → PDF bytes.
//!
//! The report is drawn directly with `lopdf` using the standard Type1 fonts,
//! so no font files are needed at runtime. Layout is a simple top-down flow:
//!
//! ```text
//! <Title> Analysis Report
//! ──────────────────────────────
//! Extracted Key Data      label │ value rows
//! Line Items              one table per table field
//! Summary                 wrapped paragraph
//! ────────────────────  footer · Page i of n
//! ```
//!
//! Output is byte-for-byte deterministic for a given (result, style): no
//! timestamps unless [`ReportStyle::generated_at`] is set, no compression,
//! no random document ID.

use crate::error::ScanbriefError;
use crate::output::{FieldValue, NormalizedField, NormalizedResult, Report};
use crate::prompts::FieldKind;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shown for fields the model did not fill.
pub const NOT_FOUND: &str = "Not found";

// ── Style ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    #[default]
    A4,
    Letter,
}

impl PageSize {
    /// Width and height in points.
    pub fn dimensions(self) -> (f32, f32) {
        match self {
            PageSize::A4 => (595.28, 841.89),
            PageSize::Letter => (612.0, 792.0),
        }
    }
}

impl std::str::FromStr for PageSize {
    type Err = ScanbriefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a4" => Ok(PageSize::A4),
            "letter" => Ok(PageSize::Letter),
            other => Err(ScanbriefError::InvalidConfig(format!(
                "unknown page size '{other}' (expected a4 or letter)"
            ))),
        }
    }
}

/// One of the 14 standard PDF fonts, regular and bold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseFont {
    #[default]
    Helvetica,
    Times,
    Courier,
}

impl BaseFont {
    fn names(self) -> (&'static str, &'static str) {
        match self {
            BaseFont::Helvetica => ("Helvetica", "Helvetica-Bold"),
            BaseFont::Times => ("Times-Roman", "Times-Bold"),
            BaseFont::Courier => ("Courier", "Courier-Bold"),
        }
    }

    /// Average glyph advance as a fraction of the font size.
    fn avg_width(self, bold: bool) -> f32 {
        let base = match self {
            BaseFont::Helvetica => 0.52,
            BaseFont::Times => 0.47,
            BaseFont::Courier => 0.60,
        };
        if bold && self != BaseFont::Courier {
            base + 0.04
        } else {
            base
        }
    }

    /// Approximate advance of `c` as a fraction of the font size. Errs wide.
    fn glyph_width(self, c: char, bold: bool) -> f32 {
        if self == BaseFont::Courier {
            return 0.60;
        }
        let w = match c {
            'i' | 'j' | 'l' | 'I' | '.' | ',' | ':' | ';' | '\'' | '|' | '!' | ' ' => 0.28,
            'f' | 't' | 'r' | '(' | ')' | '[' | ']' | '-' | '/' => 0.34,
            'm' | 'w' | 'M' | 'W' | '@' | '%' => 0.89,
            'A'..='Z' => 0.72,
            '0'..='9' => 0.56,
            _ => 0.56,
        };
        let w = if self == BaseFont::Times { w * 0.92 } else { w };
        if bold {
            w + 0.04
        } else {
            w
        }
    }
}

impl std::str::FromStr for BaseFont {
    type Err = ScanbriefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "helvetica" => Ok(BaseFont::Helvetica),
            "times" => Ok(BaseFont::Times),
            "courier" => Ok(BaseFont::Courier),
            other => Err(ScanbriefError::InvalidConfig(format!(
                "unknown font '{other}' (expected helvetica, times or courier)"
            ))),
        }
    }
}

/// Look of the generated report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportStyle {
    /// `standard` (two-column key table) or `compact` (inline labels).
    pub layout: String,
    pub page_size: PageSize,
    /// Page margin in points.
    pub margin: f32,
    pub font: BaseFont,
    pub title_size: f32,
    pub heading_size: f32,
    pub body_size: f32,
    /// RGB accent used for the title, headings and table headers.
    pub accent: [u8; 3],
    /// Left-hand footer text on every page.
    pub footer: String,
    /// Printed under the title when set. Leave unset for reproducible output.
    pub generated_at: Option<String>,
}

impl Default for ReportStyle {
    fn default() -> Self {
        Self {
            layout: "standard".into(),
            page_size: PageSize::A4,
            margin: 56.0,
            font: BaseFont::Helvetica,
            title_size: 20.0,
            heading_size: 13.0,
            body_size: 10.0,
            accent: [0x1F, 0x4E, 0x79],
            footer: "Generated by scanbrief".into(),
            generated_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Standard,
    Compact,
}

impl Layout {
    fn parse(s: &str) -> Result<Self, ScanbriefError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Layout::Standard),
            "compact" => Ok(Layout::Compact),
            other => Err(ScanbriefError::render(format!(
                "unknown report layout '{other}' (expected standard or compact)"
            ))),
        }
    }
}

/// Font sizes and spacing derived from a style and layout.
#[derive(Debug, Clone, Copy)]
struct Metrics {
    title: f32,
    heading: f32,
    body: f32,
    leading: f32,
    section_gap: f32,
    cell_pad: f32,
}

impl Metrics {
    fn new(style: &ReportStyle, layout: Layout) -> Self {
        let scale = match layout {
            Layout::Standard => 1.0,
            Layout::Compact => 0.85,
        };
        let body = style.body_size * scale;
        Self {
            title: style.title_size * scale,
            heading: style.heading_size * scale,
            body,
            leading: body
                * match layout {
                    Layout::Standard => 1.35,
                    Layout::Compact => 1.2,
                },
            section_gap: match layout {
                Layout::Standard => 18.0,
                Layout::Compact => 10.0,
            },
            cell_pad: match layout {
                Layout::Standard => 4.0,
                Layout::Compact => 2.0,
            },
        }
    }
}

// ── Entry point ──────────────────────────────────────────────────────────

/// Suggested download name, e.g. `invoice_analysis_summary.pdf`.
pub fn report_file_name(result: &NormalizedResult) -> String {
    let stem: String = result
        .title
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "document".to_string() } else { stem };
    format!("{stem}_analysis_summary.pdf")
}

/// Render `result` as a PDF report.
///
/// # Errors
/// [`ScanbriefError::Render`] for an unknown layout, a style that leaves no
/// room for content, or a serialisation failure.
pub fn render_report(result: &NormalizedResult, style: &ReportStyle) -> Result<Report, ScanbriefError> {
    let layout = Layout::parse(&style.layout)?;
    let (width, height) = style.page_size.dimensions();
    if !style.margin.is_finite()
        || style.margin < 0.0
        || style.margin * 2.0 >= width.min(height) - 100.0
    {
        return Err(ScanbriefError::render(format!(
            "margin {} leaves no room for content",
            style.margin
        )));
    }
    let sizes = [style.body_size, style.heading_size, style.title_size];
    if sizes.iter().any(|s| !s.is_finite() || *s <= 0.0) {
        return Err(ScanbriefError::render("font sizes must be positive numbers"));
    }

    let mut w = PageWriter::new(style, layout);

    w.title(&format!("{} Analysis Report", result.title));
    if let Some(ts) = &style.generated_at {
        w.caption(&format!("Generated {ts}"));
    }

    w.heading("Extracted Key Data");
    let key_fields: Vec<&NormalizedField> = result
        .fields
        .iter()
        .filter(|f| !f.summary && !is_table(f))
        .collect();
    if key_fields.is_empty() {
        w.paragraph("No key data defined for this document type.");
    }
    for field in key_fields {
        let label = humanize(&field.name);
        let value = display_value(&field.value);
        match layout {
            Layout::Standard => w.key_row(&label, &value, field.value.is_absent()),
            Layout::Compact => w.inline_row(&label, &value),
        }
    }

    let tables: Vec<&NormalizedField> = result.fields.iter().filter(|f| is_table(f)).collect();
    if !tables.is_empty() {
        w.heading("Line Items");
        let titled = tables.len() > 1;
        for field in tables {
            if titled {
                w.subheading(&humanize(&field.name));
            }
            match &field.value {
                FieldValue::Table { columns, rows } => w.table(columns, rows),
                _ => w.paragraph("No line items found."),
            }
        }
    }

    w.heading("Summary");
    match result.summary.as_deref() {
        Some(s) => w.paragraph(s),
        None => w.paragraph("No summary available."),
    }

    let pages = w.finish();
    let bytes = assemble(result, style, pages)?;
    debug!("Rendered {} report: {} bytes", result.template, bytes.len());

    Ok(Report {
        bytes,
        file_name: report_file_name(result),
    })
}

fn is_table(f: &NormalizedField) -> bool {
    f.kind == FieldKind::Table || matches!(f.value, FieldValue::Table { .. })
}

fn display_value(v: &FieldValue) -> String {
    match v {
        FieldValue::Text(s) => s.clone(),
        FieldValue::List(items) => items.join(", "),
        FieldValue::Table { rows, .. } => format!("{} row(s)", rows.len()),
        FieldValue::Absent => NOT_FOUND.to_string(),
    }
}

/// `total_amount` → `Total Amount`.
pub fn humanize(key: &str) -> String {
    key.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Text encoding ────────────────────────────────────────────────────────

/// Encode for a WinAnsiEncoding font. Characters outside the code page
/// become `?`; control characters become spaces.
fn win_ansi(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| match c {
            '\u{20AC}' => 0x80,
            '\u{2026}' => 0x85,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            c if c.is_control() => b' ',
            c if (c as u32) < 0x80 => c as u8,
            c if (0xA0..=0xFF).contains(&(c as u32)) => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

// ── Page writer ──────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Face {
    Regular,
    Bold,
}

impl Face {
    fn resource(self) -> &'static str {
        match self {
            Face::Regular => "F1",
            Face::Bold => "F2",
        }
    }
}

type Rgb = [f32; 3];

const BLACK: Rgb = [0.0, 0.0, 0.0];
const GREY: Rgb = [0.45, 0.45, 0.45];
const RULE: Rgb = [0.8, 0.8, 0.8];
const SHADE: Rgb = [0.95, 0.95, 0.95];

fn rgb(c: [u8; 3]) -> Rgb {
    [c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0]
}

/// Lighter tint of `c` for table header fills.
fn tint(c: Rgb) -> Rgb {
    [0.85 + c[0] * 0.15, 0.85 + c[1] * 0.15, 0.85 + c[2] * 0.15]
}

struct PageWriter<'a> {
    style: &'a ReportStyle,
    layout: Layout,
    m: Metrics,
    width: f32,
    height: f32,
    accent: Rgb,
    pages: Vec<Vec<Operation>>,
    ops: Vec<Operation>,
    /// Baseline cursor, moving down.
    y: f32,
}

impl<'a> PageWriter<'a> {
    fn new(style: &'a ReportStyle, layout: Layout) -> Self {
        let (width, height) = style.page_size.dimensions();
        Self {
            style,
            layout,
            m: Metrics::new(style, layout),
            width,
            height,
            accent: rgb(style.accent),
            pages: Vec::new(),
            ops: Vec::new(),
            y: height - style.margin,
        }
    }

    fn left(&self) -> f32 {
        self.style.margin
    }

    fn content_width(&self) -> f32 {
        self.width - 2.0 * self.style.margin
    }

    /// Lowest baseline content may use; the footer lives below it.
    fn floor(&self) -> f32 {
        self.style.margin + self.m.body * 2.5
    }

    fn new_page(&mut self) {
        let ops = std::mem::take(&mut self.ops);
        self.pages.push(ops);
        self.y = self.height - self.style.margin;
    }

    fn ensure(&mut self, needed: f32) {
        if self.y - needed < self.floor() {
            self.new_page();
        }
    }

    /// Wrap to `width` points. Starts from the average glyph width and
    /// narrows until every line measures within `width`.
    fn wrap(&self, text: &str, width: f32, size: f32, face: Face) -> Vec<String> {
        let avg = self.style.font.avg_width(matches!(face, Face::Bold)) * size;
        let mut cols = ((width / avg).floor() as usize).max(1);
        loop {
            let lines = Self::wrap_columns(text, cols);
            let fits = lines.iter().all(|l| self.text_width(l, size, face) <= width);
            if fits || cols == 1 {
                return lines;
            }
            cols -= (cols / 8).max(1);
        }
    }

    fn wrap_columns(text: &str, cols: usize) -> Vec<String> {
        let mut lines = Vec::new();
        for para in text.lines() {
            if para.trim().is_empty() {
                lines.push(String::new());
                continue;
            }
            lines.extend(textwrap::wrap(para, cols).into_iter().map(|l| l.into_owned()));
        }
        if lines.is_empty() {
            lines.push(String::new());
        }
        lines
    }

    fn text_width(&self, text: &str, size: f32, face: Face) -> f32 {
        let bold = matches!(face, Face::Bold);
        text.chars()
            .map(|c| self.style.font.glyph_width(c, bold))
            .sum::<f32>()
            * size
    }

    /// Shorten `line` so that it plus an ellipsis fits in `width`.
    fn ellipsize(&self, line: &str, width: f32, size: f32, face: Face) -> String {
        let mut out = line.trim_end().to_string();
        while !out.is_empty() && self.text_width(&format!("{out}\u{2026}"), size, face) > width {
            out.pop();
        }
        out.push('\u{2026}');
        out
    }

    // ── drawing primitives ──

    fn draw_text(&mut self, x: f32, y: f32, size: f32, face: Face, color: Rgb, text: &str) {
        if text.is_empty() {
            return;
        }
        self.ops.extend([
            Operation::new("rg", color.iter().map(|&c| Object::Real(c)).collect()),
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![face.resource().into(), Object::Real(size)]),
            Operation::new("Td", vec![Object::Real(x), Object::Real(y)]),
            Operation::new("Tj", vec![Object::String(win_ansi(text), StringFormat::Literal)]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Rgb) {
        self.ops.extend([
            Operation::new("rg", color.iter().map(|&c| Object::Real(c)).collect()),
            Operation::new(
                "re",
                vec![Object::Real(x), Object::Real(y), Object::Real(w), Object::Real(h)],
            ),
            Operation::new("f", vec![]),
        ]);
    }

    fn hline(&mut self, y: f32, color: Rgb, thickness: f32) {
        let (x1, x2) = (self.left(), self.width - self.style.margin);
        self.ops.extend([
            Operation::new("RG", color.iter().map(|&c| Object::Real(c)).collect()),
            Operation::new("w", vec![Object::Real(thickness)]),
            Operation::new("m", vec![Object::Real(x1), Object::Real(y)]),
            Operation::new("l", vec![Object::Real(x2), Object::Real(y)]),
            Operation::new("S", vec![]),
        ]);
    }

    // ── blocks ──

    fn title(&mut self, text: &str) {
        let size = self.m.title;
        let lines = self.wrap(text, self.content_width(), size, Face::Bold);
        for line in lines {
            self.ensure(size * 1.2);
            self.y -= size;
            let (x, y, accent) = (self.left(), self.y, self.accent);
            self.draw_text(x, y, size, Face::Bold, accent, &line);
            self.y -= size * 0.2;
        }
        self.y -= 6.0;
        let (y, accent) = (self.y, self.accent);
        self.hline(y, accent, 1.5);
        self.y -= 4.0;
    }

    fn caption(&mut self, text: &str) {
        let size = self.m.body * 0.9;
        self.ensure(size * 1.5);
        self.y -= size * 1.4;
        let (x, y) = (self.left(), self.y);
        self.draw_text(x, y, size, Face::Regular, GREY, text);
    }

    fn heading(&mut self, text: &str) {
        let size = self.m.heading;
        // Keep a heading together with at least two body lines.
        self.ensure(self.m.section_gap + size + self.m.leading * 2.0);
        self.y -= self.m.section_gap + size;
        let (x, y, accent) = (self.left(), self.y, self.accent);
        self.draw_text(x, y, size, Face::Bold, accent, text);
        self.y -= 4.0;
        let y = self.y;
        self.hline(y, RULE, 0.5);
        self.y -= self.m.cell_pad;
    }

    fn subheading(&mut self, text: &str) {
        let size = self.m.body * 1.05;
        self.ensure(size * 1.6 + self.m.leading * 2.0);
        self.y -= size * 1.6;
        let (x, y) = (self.left(), self.y);
        self.draw_text(x, y, size, Face::Bold, BLACK, text);
        self.y -= 2.0;
    }

    fn paragraph(&mut self, text: &str) {
        let size = self.m.body;
        let lines = self.wrap(text, self.content_width(), size, Face::Regular);
        self.y -= self.m.cell_pad;
        for line in lines {
            self.ensure(self.m.leading);
            self.y -= self.m.leading;
            let (x, y) = (self.left(), self.y);
            self.draw_text(x, y, size, Face::Regular, BLACK, &line);
        }
    }

    /// Two-column label │ value row, shaded on alternate rows.
    fn key_row(&mut self, label: &str, value: &str, absent: bool) {
        let size = self.m.body;
        let pad = self.m.cell_pad;
        let label_w = self.content_width() * 0.35;
        let value_w = self.content_width() - label_w;
        let label_lines = self.wrap(label, label_w - 2.0 * pad, size, Face::Bold);
        let value_lines = self.wrap(value, value_w - 2.0 * pad, size, Face::Regular);
        let n = label_lines.len().max(value_lines.len());
        let row_h = n as f32 * self.m.leading + 2.0 * pad;

        self.ensure(row_h);
        let top = self.y;
        let x = self.left();
        self.fill_rect(x, top - row_h, label_w, row_h, SHADE);

        let color = if absent { GREY } else { BLACK };
        for (i, line) in label_lines.iter().enumerate() {
            let y = top - pad - (i + 1) as f32 * self.m.leading + size * 0.25;
            self.draw_text(x + pad, y, size, Face::Bold, BLACK, line);
        }
        for (i, line) in value_lines.iter().enumerate() {
            let y = top - pad - (i + 1) as f32 * self.m.leading + size * 0.25;
            self.draw_text(x + label_w + pad, y, size, Face::Regular, color, line);
        }
        self.y = top - row_h;
        let y = self.y;
        self.hline(y, RULE, 0.5);
    }

    /// `Label: value` on one wrapped paragraph.
    fn inline_row(&mut self, label: &str, value: &str) {
        let size = self.m.body;
        let prefix = format!("{label}: ");
        let lines = self.wrap(&format!("{prefix}{value}"), self.content_width(), size, Face::Regular);
        for (i, line) in lines.iter().enumerate() {
            self.ensure(self.m.leading);
            self.y -= self.m.leading;
            let (x, y) = (self.left(), self.y);
            if i == 0 && line.starts_with(&prefix) {
                let label_w = self.text_width(&prefix, size, Face::Bold);
                self.draw_text(x, y, size, Face::Bold, BLACK, &prefix);
                self.draw_text(x + label_w, y, size, Face::Regular, BLACK, &line[prefix.len()..]);
            } else {
                self.draw_text(x, y, size, Face::Regular, BLACK, line);
            }
        }
    }

    fn table(&mut self, columns: &[String], rows: &[Vec<String>]) {
        if columns.is_empty() {
            return;
        }
        let headers: Vec<String> = columns.iter().map(|c| humanize(c)).collect();
        self.y -= self.m.cell_pad;
        self.table_row(&headers, Face::Bold, Some(tint(self.accent)));
        for (i, row) in rows.iter().enumerate() {
            let fill = (self.layout == Layout::Standard && i % 2 == 1).then_some(SHADE);
            self.table_row(row, Face::Regular, fill);
        }
    }

    fn table_row(&mut self, cells: &[String], face: Face, fill: Option<Rgb>) {
        let size = self.m.body;
        let pad = self.m.cell_pad;
        let n = cells.len().max(1);
        let col_w = self.content_width() / n as f32;
        let wrapped: Vec<Vec<String>> = cells
            .iter()
            .map(|c| self.wrap(c, col_w - 2.0 * pad, size, face))
            .collect();
        let lines = wrapped.iter().map(Vec::len).max().unwrap_or(1);
        let max_lines = (((self.height - 2.0 * self.style.margin) * 0.8 - 2.0 * pad) / self.m.leading)
            .floor()
            .max(1.0) as usize;
        let lines = lines.min(max_lines);
        let row_h = lines as f32 * self.m.leading + 2.0 * pad;

        self.ensure(row_h);
        let top = self.y;
        let x0 = self.left();
        if let Some(color) = fill {
            let w = self.content_width();
            self.fill_rect(x0, top - row_h, w, row_h, color);
        }
        for (ci, cell_lines) in wrapped.iter().enumerate() {
            let x = x0 + ci as f32 * col_w + pad;
            let clipped = cell_lines.len() > lines;
            for (li, line) in cell_lines.iter().take(lines).enumerate() {
                let y = top - pad - (li + 1) as f32 * self.m.leading + size * 0.25;
                if clipped && li + 1 == lines {
                    let last = self.ellipsize(line, col_w - 2.0 * pad, size, face);
                    self.draw_text(x, y, size, face, BLACK, &last);
                } else {
                    self.draw_text(x, y, size, face, BLACK, line);
                }
            }
        }
        self.y = top - row_h;
        let y = self.y;
        self.hline(y, RULE, 0.5);
    }

    /// Close the last page and stamp footers now that the page count is known.
    fn finish(mut self) -> Vec<Vec<Operation>> {
        self.new_page();
        let total = self.pages.len();
        let size = self.m.body * 0.8;
        let y = self.style.margin;
        let rule_y = y + size * 1.5;
        let right = self.width - self.style.margin;
        let mut pages = std::mem::take(&mut self.pages);
        for (i, page) in pages.iter_mut().enumerate() {
            self.ops = std::mem::take(page);
            self.hline(rule_y, RULE, 0.5);
            let footer = self.style.footer.clone();
            let left = self.left();
            self.draw_text(left, y, size, Face::Regular, GREY, &footer);
            let label = format!("Page {} of {}", i + 1, total);
            let lw = self.text_width(&label, size, Face::Regular);
            self.draw_text(right - lw, y, size, Face::Regular, GREY, &label);
            *page = std::mem::take(&mut self.ops);
        }
        pages
    }
}

// ── Document assembly ────────────────────────────────────────────────────

fn assemble(
    result: &NormalizedResult,
    style: &ReportStyle,
    pages: Vec<Vec<Operation>>,
) -> Result<Vec<u8>, ScanbriefError> {
    let (width, height) = style.page_size.dimensions();
    let (regular, bold) = style.font.names();

    let mut doc = Document::with_version("1.5");
    let pages_id: ObjectId = doc.new_object_id();
    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => regular,
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => bold,
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => regular_id, "F2" => bold_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations }
            .encode()
            .map_err(|e| ScanbriefError::render(format!("content encoding failed: {e}")))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
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
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(width), Object::Real(height)],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::String(win_ansi(&format!("{} Analysis Report", result.title)), StringFormat::Literal),
        "Producer" => Object::string_literal("scanbrief"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| ScanbriefError::render(format!("PDF serialisation failed: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, kind: FieldKind, summary: bool, value: FieldValue) -> NormalizedField {
        NormalizedField {
            name: name.into(),
            kind,
            summary,
            value,
        }
    }

    fn invoice() -> NormalizedResult {
        NormalizedResult {
            template: "invoice".into(),
            title: "Invoice".into(),
            fields: vec![
                field("invoice_number", FieldKind::Text, false, FieldValue::Text("INV-7".into())),
                field("total_amount", FieldKind::Text, false, FieldValue::Text("42.00".into())),
                field("due_date", FieldKind::Text, false, FieldValue::Absent),
                field(
                    "items",
                    FieldKind::Table,
                    false,
                    FieldValue::Table {
                        columns: vec!["description".into(), "line_total".into()],
                        rows: vec![vec!["Widget (blue)".into(), "42.00".into()]],
                    },
                ),
                field(
                    "summary",
                    FieldKind::Text,
                    true,
                    FieldValue::Text("One widget billed.".into()),
                ),
            ],
            summary: Some("One widget billed.".into()),
        }
    }

    fn contains(haystack: &[u8], needle: &str) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle.as_bytes())
    }

    #[test]
    fn report_is_a_pdf_with_values() {
        let report = render_report(&invoice(), &ReportStyle::default()).unwrap();
        assert!(report.bytes.starts_with(b"%PDF-1.5"));
        assert_eq!(report.file_name, "invoice_analysis_summary.pdf");
        assert!(contains(&report.bytes, "42.00"));
        assert!(contains(&report.bytes, "Invoice Analysis Report"));
        assert!(contains(&report.bytes, "Total Amount"));
        assert!(contains(&report.bytes, NOT_FOUND));
        assert!(contains(&report.bytes, "One widget billed."));

        let doc = lopdf::Document::load_mem(&report.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn rendering_is_deterministic() {
        let style = ReportStyle::default();
        let a = render_report(&invoice(), &style).unwrap();
        let b = render_report(&invoice(), &style).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn generated_at_is_printed_only_when_set() {
        let plain = render_report(&invoice(), &ReportStyle::default()).unwrap();
        assert!(!contains(&plain.bytes, "Generated 2026"));
        let style = ReportStyle {
            generated_at: Some("2026-01-02 10:00".into()),
            ..ReportStyle::default()
        };
        let stamped = render_report(&invoice(), &style).unwrap();
        assert!(contains(&stamped.bytes, "Generated 2026-01-02 10:00"));
    }

    #[test]
    fn unknown_layout_is_a_render_error() {
        let style = ReportStyle {
            layout: "fancy".into(),
            ..ReportStyle::default()
        };
        let err = render_report(&invoice(), &style).unwrap_err();
        assert!(matches!(err, ScanbriefError::Render { .. }));
    }

    #[test]
    fn compact_layout_renders() {
        let style = ReportStyle {
            layout: "compact".into(),
            page_size: PageSize::Letter,
            font: BaseFont::Times,
            ..ReportStyle::default()
        };
        let report = render_report(&invoice(), &style).unwrap();
        assert!(contains(&report.bytes, "Times-Roman"));
        assert!(contains(&report.bytes, "42.00"));
    }

    #[test]
    fn long_content_breaks_pages() {
        let mut r = invoice();
        let rows: Vec<Vec<String>> = (0..200)
            .map(|i| vec![format!("Item {i}"), format!("{i}.00")])
            .collect();
        r.fields[3].value = FieldValue::Table {
            columns: vec!["description".into(), "line_total".into()],
            rows,
        };
        let report = render_report(&r, &ReportStyle::default()).unwrap();
        let doc = lopdf::Document::load_mem(&report.bytes).unwrap();
        let n = doc.get_pages().len();
        assert!(n > 1);
        assert!(contains(&report.bytes, &format!("Page {n} of {n}")));
    }

    #[test]
    fn absent_table_and_summary_have_placeholders() {
        let mut r = invoice();
        r.fields[3].value = FieldValue::Absent;
        r.summary = None;
        let report = render_report(&r, &ReportStyle::default()).unwrap();
        assert!(contains(&report.bytes, "No line items found."));
        assert!(contains(&report.bytes, "No summary available."));
    }

    #[test]
    fn non_latin_text_degrades_to_question_marks() {
        assert_eq!(win_ansi("Café €5 – 日本"), b"Caf\xe9 \x805 \x96 ??".to_vec());
        assert_eq!(win_ansi("a\tb"), b"a b".to_vec());
    }

    #[test]
    fn humanize_keys() {
        assert_eq!(humanize("total_amount"), "Total Amount");
        assert_eq!(humanize("key_clauses_summary"), "Key Clauses Summary");
        assert_eq!(humanize("name"), "Name");
    }

    #[test]
    fn file_name_from_title() {
        let mut r = invoice();
        r.title = "Document".into();
        assert_eq!(report_file_name(&r), "document_analysis_summary.pdf");
        r.title = "Purchase Order".into();
        assert_eq!(report_file_name(&r), "purchase_order_analysis_summary.pdf");
    }

    #[test]
    fn non_finite_style_is_rejected() {
        for style in [
            ReportStyle {
                margin: f32::NAN,
                ..ReportStyle::default()
            },
            ReportStyle {
                body_size: f32::NAN,
                ..ReportStyle::default()
            },
            ReportStyle {
                title_size: f32::INFINITY,
                ..ReportStyle::default()
            },
        ] {
            let err = render_report(&invoice(), &style).unwrap_err();
            assert!(matches!(err, ScanbriefError::Render { .. }), "{style:?}");
        }
    }

    #[test]
    fn wide_glyphs_wrap_within_width() {
        let style = ReportStyle::default();
        let w = PageWriter::new(&style, Layout::Standard);
        let text = "WWWWWWWWWW MMMMMMMMMM WWWWWWWWWW MMMMMMMMMM WWWWWWWWWW";
        let lines = w.wrap(text, 120.0, 10.0, Face::Bold);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(w.text_width(line, 10.0, Face::Bold) <= 120.0, "{line:?} overflows");
        }
    }

    #[test]
    fn clipped_cell_ends_with_ellipsis() {
        let style = ReportStyle::default();
        let mut w = PageWriter::new(&style, Layout::Standard);
        let huge = "lorem ipsum ".repeat(2_000);
        w.table_row(&[huge, "42.00".into()], Face::Regular, None);

        let drawn: Vec<Vec<u8>> = w
            .ops
            .iter()
            .filter(|op| op.operator == "Tj")
            .filter_map(|op| match op.operands.first() {
                Some(Object::String(bytes, _)) => Some(bytes.clone()),
                _ => None,
            })
            .collect();
        assert!(drawn.iter().any(|b| b.as_slice() == b"42.00"));
        let clipped: Vec<&Vec<u8>> = drawn.iter().filter(|b| b.last() == Some(&0x85)).collect();
        assert_eq!(clipped.len(), 1, "exactly the overflowing cell is marked");
    }

    #[test]
    fn ellipsis_fits_the_column() {
        let style = ReportStyle::default();
        let w = PageWriter::new(&style, Layout::Standard);
        let line = w.ellipsize(&"x".repeat(500), 100.0, 10.0, Face::Regular);
        assert!(line.ends_with('\u{2026}'));
        assert!(w.text_width(&line, 10.0, Face::Regular) <= 100.0);
    }
}
