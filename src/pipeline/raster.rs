//! PDF rasterisation: render scanned pages to PNG files via pdfium.
//!
//! Only pages without a usable text layer come through here. Rendering runs
//! in `spawn_blocking` because pdfium is CPU-bound and keeps thread-local
//! state. Binding is fallible: a host without the pdfium shared library gets
//! an extraction error, not a panic.

use crate::error::ScanbriefError;
use crate::pipeline::encode::encode_png;
use crate::pipeline::input::ScratchDir;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable naming a directory that holds the pdfium library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Rendering knobs, copied out of the config so they can cross into a blocking task.
#[derive(Debug, Clone)]
pub struct RasterOptions {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub pdfium_lib_dir: Option<PathBuf>,
}

/// Rasterise the given 1-indexed pages into the scratch directory.
///
/// # Returns
/// `(page_num, png_path)` pairs in the order requested.
pub async fn render_pages(
    pdf: Arc<[u8]>,
    page_nums: Vec<usize>,
    scratch: &ScratchDir,
    options: RasterOptions,
) -> Result<Vec<(usize, PathBuf)>, ScanbriefError> {
    let targets: Vec<(usize, PathBuf)> = page_nums
        .into_iter()
        .map(|n| (n, scratch.page_path(n)))
        .collect();

    tokio::task::spawn_blocking(move || render_pages_blocking(&pdf, &targets, &options))
        .await
        .map_err(|e| ScanbriefError::Internal(format!("Render task panicked: {}", e)))?
}

fn render_pages_blocking(
    pdf: &[u8],
    targets: &[(usize, PathBuf)],
    options: &RasterOptions,
) -> Result<Vec<(usize, PathBuf)>, ScanbriefError> {
    let pdfium = bind_pdfium(options.pdfium_lib_dir.as_deref())?;

    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| ScanbriefError::extraction(format!("pdfium cannot open PDF: {:?}", e)))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("Rasterising {} of {} pages", targets.len(), total_pages);

    let max = options.max_rendered_pixels as i32;
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(options.dpi as f32 / 72.0)
        .set_maximum_width(max)
        .set_maximum_height(max);

    let mut results = Vec::with_capacity(targets.len());

    for (page_num, out_path) in targets {
        if *page_num == 0 || *page_num > total_pages {
            return Err(ScanbriefError::extraction(format!(
                "page {} out of range (total={})",
                page_num, total_pages
            )));
        }

        let page = pages
            .get((*page_num - 1) as u16)
            .map_err(|e| rasterisation_failed(*page_num, e))?;

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| rasterisation_failed(*page_num, e))?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );

        let png = encode_png(&image)?;
        std::fs::write(out_path, &png).map_err(|e| ScanbriefError::Io {
            path: out_path.clone(),
            source: e,
        })?;

        results.push((*page_num, out_path.clone()));
    }

    Ok(results)
}

fn rasterisation_failed(page_num: usize, e: PdfiumError) -> ScanbriefError {
    ScanbriefError::extraction(format!("rasterising page {} failed: {:?}", page_num, e))
}

/// Bind to pdfium: explicit directory, then `PDFIUM_LIB_PATH`, then the system library.
fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, ScanbriefError> {
    let env_dir = std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from);
    let dir = lib_dir.map(Path::to_path_buf).or(env_dir);

    let bindings = match dir {
        Some(dir) => {
            debug!("Binding pdfium from {}", dir.display());
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| {
        ScanbriefError::extraction(format!(
            "scanned PDF pages need the pdfium library, which could not be loaded ({:?}); \
             set {} to the directory containing it",
            e, PDFIUM_LIB_PATH_ENV
        ))
    })?;

    Ok(Pdfium::new(bindings))
}
