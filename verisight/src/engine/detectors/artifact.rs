/*!
Artifact analyzer: compression, clipping and sharpening traces
*/

use std::sync::Arc;

use async_trait::async_trait;
use verisight_forensics::{NormalizedImage, stats};

use super::{CancelSignal, Detector};
use crate::engine::aggregator::max_severity_confidence;
use crate::engine::model::{DetectorCategory, DetectorInfo, DetectorResult, Finding, Severity};

/// (threshold, severity) pairs, checked from the most severe down.
const BLOCKINESS_LEVELS: [(f64, Severity); 3] = [
    (1.8, Severity::High),
    (1.35, Severity::Medium),
    (1.15, Severity::Low),
];
const CLIPPING_LEVELS: [(f64, Severity); 2] = [(0.25, Severity::Medium), (0.08, Severity::Low)];
const OVERSHARPENED_ENERGY: f64 = 0.35;

pub struct ArtifactAnalyzer;

#[async_trait]
impl Detector for ArtifactAnalyzer {
    fn info(&self) -> DetectorInfo {
        DetectorInfo {
            id: "artifact",
            version: "1.0.0",
            category: DetectorCategory::Artifact,
        }
    }

    async fn detect(&self, image: &Arc<NormalizedImage>, cancel: &CancelSignal) -> DetectorResult {
        let info = self.info();
        let image = Arc::clone(image);
        let cancel = cancel.clone();

        match tokio::task::spawn_blocking(move || analyze(&image, &cancel)).await {
            Ok(Some(findings)) => {
                let confidence = max_severity_confidence(&findings).unwrap_or(0.0);
                DetectorResult::completed(info, confidence, findings)
            }
            Ok(None) => DetectorResult::failed(info, "cancelled before completion"),
            Err(e) => DetectorResult::failed(info, format!("analysis worker aborted: {e}")),
        }
    }
}

fn level(value: f64, levels: &[(f64, Severity)]) -> Option<Severity> {
    levels
        .iter()
        .find(|(threshold, _)| value > *threshold)
        .map(|(_, severity)| *severity)
}

/// Run every artifact check; `None` when cancelled part way.
fn analyze(image: &NormalizedImage, cancel: &CancelSignal) -> Option<Vec<Finding>> {
    let plane = image.luma();
    let mut findings = Vec::new();

    let blockiness = stats::grid_blockiness(&plane);
    if let Some(severity) = level(blockiness, &BLOCKINESS_LEVELS) {
        findings.push(Finding::new(
            "jpeg_block_grid",
            severity,
            severity.confidence(),
            format!("8x8 block edges are {blockiness:.2}x stronger than block interiors"),
        ));
    }
    if cancel.is_cancelled() {
        return None;
    }

    let clipping = stats::clipping_ratio(image.pixels());
    if let Some(severity) = level(clipping, &CLIPPING_LEVELS) {
        findings.push(Finding::new(
            "channel_clipping",
            severity,
            severity.confidence(),
            format!("{:.1}% of channel samples are clipped", clipping * 100.0),
        ));
    }
    if cancel.is_cancelled() {
        return None;
    }

    let energy = stats::high_frequency_energy(&plane);
    if energy > OVERSHARPENED_ENERGY {
        findings.push(Finding::new(
            "oversharpening",
            Severity::Low,
            Severity::Low.confidence(),
            format!("high-frequency energy {energy:.3} suggests aggressive sharpening"),
        ));
    }

    Some(findings)
}
