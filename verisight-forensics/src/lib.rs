/*!
Image-level tooling shared by the Verisight detectors.

Raw bytes are decoded and normalized once ([`normalize`]), which yields an
immutable [`NormalizedImage`] carrying its content [`ImageFingerprint`] and the
metadata markers found in the original file. The [`stats`] module holds the
pixel statistics that the built-in detectors are assembled from.
*/

pub mod error;
pub mod fingerprint;
pub mod metadata;
pub mod normalize;
pub mod stats;

pub use error::ForensicsError;
pub use fingerprint::ImageFingerprint;
pub use metadata::{ImageMetadata, MarkerKind, MetadataMarker};
pub use normalize::{NormalizeOptions, NormalizedImage, normalize};
