/// Fidelity-tier recompression for stored artwork
///
/// When the local store runs out of room, image payloads are decoded,
/// shrunk to a bounded dimension and re-encoded as JPEG at a lower
/// quality. Each tier trades fidelity for bytes; the persistence
/// manager walks them in increasing compression order.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::io::Cursor;
use thiserror::Error;
use tokio::task;

use crate::state::data::ImagePayload;

/// One compression level: a bounding dimension plus JPEG quality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FidelityTier {
    /// Longest edge after resizing (images already smaller keep their size)
    pub max_dim: u32,
    /// JPEG quality, 1-100
    pub quality: u8,
}

/// Gallery entries as created after a successful generation
pub const GALLERY_THUMB: FidelityTier = FidelityTier {
    max_dim: 400,
    quality: 30,
};

/// Standard artwork size for custom styles
pub const STYLE_PREVIEW: FidelityTier = FidelityTier {
    max_dim: 300,
    quality: 30,
};

/// Second-chance tier for custom style previews when the store is full
pub const STYLE_COMPACT_PREVIEW: FidelityTier = FidelityTier {
    max_dim: 200,
    quality: 20,
};

/// Second-chance tier for custom style thumbnails
pub const STYLE_COMPACT_THUMB: FidelityTier = FidelityTier {
    max_dim: 150,
    quality: 20,
};

/// Second-chance tier for gallery entries
pub const GALLERY_COMPACT: FidelityTier = FidelityTier {
    max_dim: 300,
    quality: 20,
};

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(image::ImageError),
    #[error("image task failed: {0}")]
    Task(String),
}

/// Decode a payload, shrink it to the tier's bounding box and re-encode
/// as JPEG at the tier's quality. Images already inside the box are
/// re-encoded without resizing.
pub fn recompress(payload: &ImagePayload, tier: FidelityTier) -> Result<ImagePayload, ImagingError> {
    let img = image::load_from_memory(&payload.data).map_err(ImagingError::Decode)?;

    let img = if img.width() > tier.max_dim || img.height() > tier.max_dim {
        img.resize(tier.max_dim, tier.max_dim, FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG has no alpha channel, flatten before encoding
    let rgb = img.to_rgb8();

    let mut data = Vec::new();
    let mut cursor = Cursor::new(&mut data);
    let encoder = JpegEncoder::new_with_quality(&mut cursor, tier.quality);
    rgb.write_with_encoder(encoder).map_err(ImagingError::Encode)?;

    Ok(ImagePayload::new("image/jpeg", data))
}

/// Async wrapper for recompression.
/// Decode and re-encode are CPU-bound, so the work runs on the
/// blocking thread pool instead of stalling the UI runtime.
pub async fn recompress_async(
    payload: ImagePayload,
    tier: FidelityTier,
) -> Result<ImagePayload, ImagingError> {
    task::spawn_blocking(move || recompress(&payload, tier))
        .await
        .map_err(|e| ImagingError::Task(e.to_string()))?
}

/// Pixel dimensions of an encoded payload
pub fn dimensions(payload: &ImagePayload) -> Result<(u32, u32), ImagingError> {
    let img = image::load_from_memory(&payload.data).map_err(ImagingError::Decode)?;
    Ok((img.width(), img.height()))
}
