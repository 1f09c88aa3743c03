//! Decoding of the server's mask payload: base64 over an 8-bit PNG where
//! 0 = excluded, 255 = included.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::GrayImage;

use crate::error::EngineError;

pub fn decode_mask_png(mask_png_base64: &str) -> Result<GrayImage, EngineError> {
    let bytes = STANDARD
        .decode(mask_png_base64.trim())
        .map_err(|error| EngineError::MaskDecode {
            message: format!("base64: {error}"),
        })?;
    let decoded = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png).map_err(
        |error| EngineError::MaskDecode {
            message: format!("png: {error}"),
        },
    )?;
    Ok(decoded.into_luma8())
}
