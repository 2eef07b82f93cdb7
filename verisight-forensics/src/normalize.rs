/*!
Decoding and normalization of submitted images
*/

use image::GenericImageView;
use image::imageops::FilterType;

use crate::error::ForensicsError;
use crate::fingerprint::ImageFingerprint;
use crate::metadata::{self, ImageMetadata};
use crate::stats::LumaPlane;

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Longest edge after normalization; larger images are downscaled.
    pub max_dimension: u32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
        }
    }
}

/// A decoded, size-bounded RGB8 image plus what its container declared.
///
/// Immutable once built; detectors receive it behind an `Arc` and only
/// ever read from it.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    metadata: ImageMetadata,
    fingerprint: ImageFingerprint,
}

impl NormalizedImage {
    /// Build from an already-normalized RGB8 buffer.
    pub fn from_rgb8(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        metadata: ImageMetadata,
    ) -> Result<Self, ForensicsError> {
        if width == 0 || height == 0 {
            return Err(ForensicsError::ZeroArea { width, height });
        }
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(ForensicsError::PixelBufferSize {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(&width.to_le_bytes());
        hasher.update(&height.to_le_bytes());
        hasher.update(&pixels);
        hasher.update(&metadata.canonical_bytes());
        let fingerprint = ImageFingerprint::from_hasher(&hasher);

        Ok(Self {
            width,
            height,
            pixels,
            metadata,
            fingerprint,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Interleaved RGB8 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    pub fn fingerprint(&self) -> &ImageFingerprint {
        &self.fingerprint
    }

    pub fn luma(&self) -> LumaPlane {
        LumaPlane::from_rgb(self.width, self.height, &self.pixels)
    }
}

/// Decode raw bytes and normalize them for analysis.
pub fn normalize(raw: &[u8], options: &NormalizeOptions) -> Result<NormalizedImage, ForensicsError> {
    if raw.is_empty() {
        return Err(ForensicsError::Empty);
    }

    let format = image::guess_format(raw)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .map(|ext| if ext == "jpg" { "jpeg" } else { ext });

    let mut decoded = image::load_from_memory(raw)?;
    let max_dimension = options.max_dimension.max(1);
    if decoded.width().max(decoded.height()) > max_dimension {
        decoded = decoded.resize(max_dimension, max_dimension, FilterType::Triangle);
    }

    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    let metadata = metadata::inspect(raw, format);

    NormalizedImage::from_rgb8(width, height, rgb.into_raw(), metadata)
}
