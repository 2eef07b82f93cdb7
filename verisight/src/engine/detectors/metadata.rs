/*!
Metadata inspector: what the container says about the image's origin
*/

use std::sync::Arc;

use async_trait::async_trait;
use verisight_forensics::{MarkerKind, NormalizedImage};

use super::ai_generation::is_latent_grid;
use super::{CancelSignal, Detector};
use crate::engine::aggregator::metadata_suspicion;
use crate::engine::model::{DetectorCategory, DetectorInfo, DetectorResult, Finding, Severity};

/// Each finding is one suspicious-pattern flag; the confidence is the flag
/// count normalized by the saturation cap.
pub struct MetadataInspector;

#[async_trait]
impl Detector for MetadataInspector {
    fn info(&self) -> DetectorInfo {
        DetectorInfo {
            id: "metadata",
            version: "1.0.0",
            category: DetectorCategory::Metadata,
        }
    }

    async fn detect(&self, image: &Arc<NormalizedImage>, _cancel: &CancelSignal) -> DetectorResult {
        let flags = inspect(image);
        DetectorResult::completed(self.info(), metadata_suspicion(flags.len()), flags)
    }
}

fn inspect(image: &NormalizedImage) -> Vec<Finding> {
    let metadata = image.metadata();
    let mut flags = Vec::new();

    for marker in metadata.markers_of(MarkerKind::Generator) {
        flags.push(Finding::new(
            "generator_signature",
            Severity::High,
            Severity::High.confidence(),
            format!("container names an image generator ({:?})", marker.token),
        ));
    }

    for marker in metadata.markers_of(MarkerKind::Editor) {
        flags.push(Finding::new(
            "editing_software",
            Severity::Medium,
            Severity::Medium.confidence(),
            format!("container names editing software ({:?})", marker.token),
        ));
    }

    if metadata.format.as_deref() == Some("jpeg") && !metadata.has_exif {
        flags.push(Finding::new(
            "missing_camera_exif",
            Severity::Low,
            0.35,
            "JPEG carries no EXIF segment; camera metadata was never written or was stripped",
        ));
    }

    if !metadata.has_exif && is_latent_grid(image.width(), image.height()) {
        flags.push(Finding::new(
            "generator_dimensions",
            Severity::Low,
            0.3,
            format!(
                "{}x{} without camera EXIF matches common generator output sizes",
                image.width(),
                image.height()
            ),
        ));
    }

    flags
}
