//! Image encoding: decoded pages → PNG bytes → base64 `ImageData`.
//!
//! Every page reaches the OCR engine as lossless PNG, whether it started as
//! a JPEG upload or a pdfium render. JPEG artefacts on re-encoded text hurt
//! recognition far more than the extra bytes cost.

use crate::error::ScanbriefError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Decode an uploaded JPEG/PNG.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ScanbriefError> {
    image::load_from_memory(bytes)
        .map_err(|e| ScanbriefError::extraction(format!("cannot decode image: {e}")))
}

/// Encode a page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ScanbriefError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| ScanbriefError::extraction(format!("PNG encoding failed: {e}")))?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Wrap PNG bytes for a multimodal API request.
///
/// `detail: "high"` lets GPT-4-class models tile the image at full
/// resolution; small print is lost otherwise.
pub fn png_to_image_data(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}
