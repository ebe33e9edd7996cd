//! Text extraction: Document → per-page text.
//!
//! ```text
//! image ──▶ decode ──▶ PNG (scratch) ──▶ OCR
//! PDF   ──▶ text layer per page ──┬─ text ────────────────────────▶ keep
//!                                 └─ blank ─▶ pdfium ─▶ PNG ─▶ OCR
//! ```
//!
//! The output always has one entry per page, in page order. A document in
//! which every page comes back blank is an error, never an empty success.

use crate::config::PipelineConfig;
use crate::error::ScanbriefError;
use crate::output::{ExtractedText, PageText, TextSource};
use crate::pipeline::encode::{decode_image, encode_png};
use crate::pipeline::input::{Document, DocumentFormat, ScratchDir};
use crate::pipeline::ocr::{engine_from_config, OcrEngine};
use crate::pipeline::raster::{render_pages, RasterOptions};
use crate::progress::ProgressCallback;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Extract text from every page of `doc`.
///
/// The OCR engine is only built when a page actually needs OCR, so text-layer
/// PDFs never touch the vision provider. Every OCR call is raced against
/// `cancel`.
pub async fn extract_text(
    doc: &Document,
    scratch: &ScratchDir,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<ExtractedText, ScanbriefError> {
    let progress = config.progress_callback.as_ref();
    let extracted = match doc.format() {
        DocumentFormat::Jpeg | DocumentFormat::Png => {
            extract_image(doc, scratch, config, cancel, progress).await?
        }
        DocumentFormat::Pdf => extract_pdf(doc, scratch, config, cancel, progress).await?,
    };

    if extracted.len() != doc.page_count() {
        return Err(ScanbriefError::Internal(format!(
            "extracted {} pages from a {}-page document",
            extracted.len(),
            doc.page_count()
        )));
    }
    if extracted.is_blank() {
        return Err(ScanbriefError::extraction("no text could be extracted"));
    }

    info!(
        "Extracted {} chars from {} page(s) ({} via OCR)",
        extracted.pages.iter().map(|p| p.text.len()).sum::<usize>(),
        extracted.len(),
        extracted.ocr_pages()
    );
    Ok(extracted)
}

async fn extract_image(
    doc: &Document,
    scratch: &ScratchDir,
    config: &PipelineConfig,
    cancel: &CancellationToken,
    progress: Option<&ProgressCallback>,
) -> Result<ExtractedText, ScanbriefError> {
    let bytes = doc.shared_bytes();
    let png = tokio::task::spawn_blocking(move || {
        let img = decode_image(&bytes)?;
        encode_png(&img)
    })
    .await
    .map_err(|e| ScanbriefError::Internal(format!("Decode task panicked: {}", e)))??;

    let path = scratch.page_path(1);
    tokio::fs::write(&path, &png)
        .await
        .map_err(|e| ScanbriefError::Io {
            path: path.clone(),
            source: e,
        })?;

    let engine = engine_from_config(config)?;
    let text = ocr_page(engine.as_ref(), &path, 1, cancel).await?;
    if let Some(cb) = progress {
        cb.on_page_extracted(1, 1);
    }

    Ok(ExtractedText {
        pages: vec![PageText {
            page_num: 1,
            text,
            source: TextSource::Ocr,
        }],
    })
}

async fn extract_pdf(
    doc: &Document,
    scratch: &ScratchDir,
    config: &PipelineConfig,
    cancel: &CancellationToken,
    progress: Option<&ProgressCallback>,
) -> Result<ExtractedText, ScanbriefError> {
    let total = doc.page_count();
    let bytes = doc.shared_bytes();
    let layers = tokio::task::spawn_blocking(move || read_text_layers(&bytes))
        .await
        .map_err(|e| ScanbriefError::Internal(format!("Text-layer task panicked: {}", e)))??;

    let mut pages: Vec<PageText> = layers
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page_num: i + 1,
            text,
            source: TextSource::TextLayer,
        })
        .collect();

    let blank: Vec<usize> = pages
        .iter()
        .filter(|p| p.text.trim().is_empty())
        .map(|p| p.page_num)
        .collect();
    debug!("{} of {} page(s) have no text layer", blank.len(), total);

    if let Some(cb) = progress {
        for p in pages.iter().filter(|p| !p.text.trim().is_empty()) {
            cb.on_page_extracted(p.page_num, total);
        }
    }

    if blank.is_empty() {
        return Ok(ExtractedText { pages });
    }

    let rendered = render_pages(
        doc.shared_bytes(),
        blank,
        scratch,
        RasterOptions {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            pdfium_lib_dir: config.pdfium_lib_dir.clone(),
        },
    )
    .await?;

    let engine: Arc<dyn OcrEngine> = engine_from_config(config)?;
    for (page_num, path) in rendered {
        let text = ocr_page(engine.as_ref(), &path, page_num, cancel).await?;
        let page = &mut pages[page_num - 1];
        page.text = text;
        page.source = TextSource::Ocr;
        if let Some(cb) = progress {
            cb.on_page_extracted(page_num, total);
        }
    }

    Ok(ExtractedText { pages })
}

async fn ocr_page(
    engine: &dyn OcrEngine,
    path: &std::path::Path,
    page_num: usize,
    cancel: &CancellationToken,
) -> Result<String, ScanbriefError> {
    let png = tokio::fs::read(path).await.map_err(|e| ScanbriefError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let text = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ScanbriefError::Cancelled),
        text = engine.recognize(&png) => text?,
    };
    debug!(
        "Page {}: {} chars via {} OCR",
        page_num,
        text.len(),
        engine.name()
    );
    Ok(text)
}

/// Embedded text of each page, in page order. Pages whose text cannot be
/// decoded come back empty so they fall through to OCR.
fn read_text_layers(bytes: &[u8]) -> Result<Vec<String>, ScanbriefError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ScanbriefError::extraction(format!("cannot parse PDF: {e}")))?;
    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    Ok(page_numbers
        .iter()
        .map(|&n| match doc.extract_text(&[n]) {
            Ok(text) => text,
            Err(e) => {
                debug!("Page {}: text layer unreadable ({}), will OCR", n, e);
                String::new()
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    /// A PDF whose pages carry the given text layers ("" = no text).
    fn pdf_with_pages(texts: &[&str]) -> Vec<u8> {
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
            let ops = if text.is_empty() {
                Vec::new()
            } else {
                vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]
            };
            let content = Content { operations: ops };
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

    #[test]
    fn text_layers_in_page_order() {
        let pdf = pdf_with_pages(&["Invoice 7", "Total 42.00"]);
        let layers = read_text_layers(&pdf).unwrap();
        assert_eq!(layers.len(), 2);
        assert!(layers[0].contains("Invoice 7"));
        assert!(layers[1].contains("42.00"));
    }

    #[tokio::test]
    async fn text_layer_pdf_needs_no_ocr() {
        let pdf = pdf_with_pages(&["Service Agreement", "Signed by both parties"]);
        let doc = Document::from_upload(pdf, Some("application/pdf"), None).unwrap();
        let scratch = ScratchDir::create(None).unwrap();
        // No OCR engine or API key configured: must not be needed.
        let config = PipelineConfig::default();
        let out = extract_text(&doc, &scratch, &config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.ocr_pages(), 0);
        assert!(out.joined().contains("Service Agreement"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_ocr() {
        struct Stuck;
        #[async_trait::async_trait]
        impl OcrEngine for Stuck {
            fn name(&self) -> &str {
                "stuck"
            }
            async fn recognize(&self, _png: &[u8]) -> Result<String, ScanbriefError> {
                std::future::pending().await
            }
        }

        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(8, 8));
        let doc = Document::from_upload(encode_png(&img).unwrap(), Some("image/png"), None).unwrap();
        let scratch = ScratchDir::create(None).unwrap();
        let config = PipelineConfig::builder().ocr_engine(Arc::new(Stuck)).build().unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = extract_text(&doc, &scratch, &config, &token).await.unwrap_err();
        assert!(matches!(err, ScanbriefError::Cancelled));
    }
}
