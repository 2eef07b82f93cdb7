/*!
Errors produced while preparing images for analysis
*/

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForensicsError {
    /// The submitted byte buffer was empty.
    #[error("image input is empty")]
    Empty,

    /// The bytes could not be decoded as a supported image format.
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// A decoded image with no pixels.
    #[error("image has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },

    /// The pixel buffer does not match the declared dimensions.
    #[error("pixel buffer holds {actual} bytes, expected {expected} for {width}x{height} RGB")]
    PixelBufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    /// A fingerprint string that is not 64 hex characters.
    #[error("invalid fingerprint: {0:?}")]
    InvalidFingerprint(String),
}
