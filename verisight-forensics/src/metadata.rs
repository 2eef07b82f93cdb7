/*!
Metadata marker extraction from raw image bytes
*/

use serde::{Deserialize, Serialize};

/// Bytes scanned at each end of the file. Text chunks and EXIF segments
/// live near the header in practice, and some tools append trailers.
const SCAN_WINDOW: usize = 64 * 1024;

/// Tokens written by image generators into text chunks or comments.
const GENERATOR_TOKENS: &[&str] = &[
    "stable diffusion",
    "midjourney",
    "dall-e",
    "dall\u{b7}e",
    "comfyui",
    "novelai",
    "invokeai",
    "adobe firefly",
    "sd-metadata",
    "negative prompt:",
];

/// Tokens written by photo editors.
const EDITOR_TOKENS: &[&str] = &[
    "adobe photoshop",
    "gimp",
    "snapseed",
    "pixelmator",
    "affinity photo",
    "lightroom",
    "paint.net",
    "facetune",
];

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const PNG_TEXT_CHUNKS: &[&[u8]] = &[b"tEXt", b"iTXt", b"zTXt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Generator,
    Editor,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetadataMarker {
    pub kind: MarkerKind,
    pub token: String,
}

/// What the original file said about itself, independent of its pixels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Detected container format (`"png"`, `"jpeg"`, ...).
    pub format: Option<String>,
    /// An EXIF segment is present.
    pub has_exif: bool,
    /// The container carries textual metadata (PNG text chunks or EXIF).
    pub has_text: bool,
    /// Known tool signatures, sorted and deduplicated.
    pub markers: Vec<MetadataMarker>,
}

impl ImageMetadata {
    pub fn markers_of(&self, kind: MarkerKind) -> impl Iterator<Item = &MetadataMarker> {
        self.markers.iter().filter(move |marker| marker.kind == kind)
    }

    /// Stable byte encoding used when fingerprinting.
    pub(crate) fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.format.as_deref().unwrap_or("").as_bytes());
        out.push(0);
        out.push(u8::from(self.has_exif));
        out.push(u8::from(self.has_text));
        for marker in &self.markers {
            out.push(match marker.kind {
                MarkerKind::Generator => b'g',
                MarkerKind::Editor => b'e',
            });
            out.extend_from_slice(marker.token.as_bytes());
            out.push(0);
        }
        out
    }
}

/// Scan raw file bytes for metadata markers.
pub fn inspect(raw: &[u8], format: Option<&str>) -> ImageMetadata {
    let windows = scan_windows(raw);

    let mut markers = Vec::new();
    for (kind, tokens) in [
        (MarkerKind::Generator, GENERATOR_TOKENS),
        (MarkerKind::Editor, EDITOR_TOKENS),
    ] {
        for token in tokens {
            if windows.iter().any(|window| contains_ignore_case(window, token.as_bytes())) {
                markers.push(MetadataMarker {
                    kind,
                    token: (*token).to_string(),
                });
            }
        }
    }
    markers.sort();
    markers.dedup();

    let has_exif = windows.iter().any(|window| contains(window, EXIF_HEADER));
    let has_text = has_exif
        || PNG_TEXT_CHUNKS
            .iter()
            .any(|chunk| windows.iter().any(|window| contains(window, chunk)));

    ImageMetadata {
        format: format.map(str::to_string),
        has_exif,
        has_text,
        markers,
    }
}

fn scan_windows(raw: &[u8]) -> Vec<&[u8]> {
    if raw.len() <= SCAN_WINDOW * 2 {
        vec![raw]
    } else {
        vec![&raw[..SCAN_WINDOW], &raw[raw.len() - SCAN_WINDOW..]]
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack
            .windows(needle.len())
            .any(|window| window.eq_ignore_ascii_case(needle))
}
