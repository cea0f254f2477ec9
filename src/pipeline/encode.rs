//! Image encoding for the remote engine: `DynamicImage` → base64 PNG.
//!
//! PNG keeps glyph edges intact; JPEG artefacts around faded scanned text
//! cost more recognition accuracy than the smaller upload saves.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Losslessly encode a page as PNG bytes.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a page as a base64 PNG attachment for a vision request.
///
/// `detail: "high"` keeps providers that tile images from downscaling the
/// page to a single overview tile, which would lose small print.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let png = png_bytes(img)?;
    let b64 = STANDARD.encode(&png);
    debug!(
        width = img.width(),
        height = img.height(),
        png_bytes = png.len(),
        "encoded page image"
    );
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
