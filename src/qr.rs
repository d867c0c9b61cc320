//! QR rendering for instance pairing codes.

use image::{ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;
use thiserror::Error;

/// Smallest side of the rendered image, in pixels
const MIN_DIMENSION: u32 = 320;

/// Errors from QR rendering
#[derive(Error, Debug)]
pub enum QrRenderError {
    /// The payload does not fit in a QR code
    #[error("QR encode error: {0}")]
    Encode(String),
    /// PNG encoding failed
    #[error("PNG encode error: {0}")]
    Image(#[from] image::ImageError),
}

/// Encodes `text` as a QR code and returns it as PNG bytes.
///
/// # Errors
///
/// Returns a `QrRenderError` if the text cannot be encoded.
pub fn render_png(text: &str) -> Result<Vec<u8>, QrRenderError> {
    let code = QrCode::new(text.as_bytes()).map_err(|e| QrRenderError::Encode(e.to_string()))?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .build();

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_png_signature() -> Result<(), QrRenderError> {
        let png = render_png("2@abcdef,ghijkl,mnopqr==")?;
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
        Ok(())
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let payload = "x".repeat(8000);
        assert!(matches!(
            render_png(&payload),
            Err(QrRenderError::Encode(_))
        ));
    }
}
