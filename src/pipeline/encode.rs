//! Page-image encoding: `DynamicImage` → JPEG bytes → base64 `ImageData`.
//!
//! JPEG is the artifact format: page scans are photographic-ish raster data,
//! stored once and then served to browsers, so compact beats lossless here.
//! The same bytes are stored, base64-inlined into stream events, and wrapped
//! into the vision request — one encode per page.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;

use crate::error::LecternError;

/// Encode a rendered page as JPEG.
///
/// pdfium hands back RGBA bitmaps; the JPEG encoder takes RGB, so the alpha
/// channel is dropped first.
pub fn encode_page(img: &DynamicImage) -> Result<Vec<u8>, LecternError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .map_err(|e| LecternError::Internal(format!("JPEG encoding failed: {e}")))?;
    Ok(buf)
}

/// Wrap stored JPEG bytes for a vision-model request.
pub fn image_payload(jpeg: &[u8]) -> ImageData {
    ImageData::new(STANDARD.encode(jpeg), "image/jpeg").with_detail("high")
}
