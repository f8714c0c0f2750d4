//! Turn raw uploaded bytes into an [`ImagePayload`] the model accepts.

use super::{ExtractionError, ImagePayload};
use image::{ImageFormat, ImageOutputFormat};
use std::io::Cursor;
use tracing::debug;

/// Sniff the image format. PNG, JPEG and WebP pass through untouched; any other
/// decodable format is re-encoded to PNG.
pub fn prepare_image(data: Vec<u8>) -> Result<ImagePayload, ExtractionError> {
    let format = image::guess_format(&data)
        .map_err(|_| ExtractionError::InvalidInput("unrecognised image format".into()))?;

    let passthrough = match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    };

    if let Some(mime_type) = passthrough {
        return Ok(ImagePayload { data, mime_type });
    }

    debug!("Re-encoding {:?} image ({} bytes) to PNG", format, data.len());
    let decoded = image::load_from_memory(&data)
        .map_err(|e| ExtractionError::InvalidInput(format!("cannot decode image: {}", e)))?;

    let mut png = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::InvalidInput(format!("cannot re-encode image: {}", e)))?;

    Ok(ImagePayload {
        data: png,
        mime_type: "image/png",
    })
}
