/*!
Manipulation detector and its built-in noise-consistency model
*/

use std::sync::Arc;

use async_trait::async_trait;
use verisight_forensics::{NormalizedImage, stats};

use super::{CancelSignal, Detector, ModelError, ModelVerdict, ScoringModel, score_with_model};
use crate::engine::model::{DetectorCategory, DetectorInfo, DetectorResult, Finding, Region, Severity};

/// Looks for regions that were pasted, cloned or retouched.
pub struct ManipulationDetector {
    model: Arc<dyn ScoringModel>,
}

impl ManipulationDetector {
    pub fn new(model: Arc<dyn ScoringModel>) -> Self {
        Self { model }
    }

    pub fn builtin() -> Self {
        Self::new(Arc::new(NoiseInconsistencyModel::default()))
    }
}

#[async_trait]
impl Detector for ManipulationDetector {
    fn info(&self) -> DetectorInfo {
        DetectorInfo {
            id: "manipulation",
            version: self.model.version(),
            category: DetectorCategory::Manipulation,
        }
    }

    async fn detect(&self, image: &Arc<NormalizedImage>, cancel: &CancelSignal) -> DetectorResult {
        score_with_model(self.info(), &self.model, image, cancel).await
    }
}

/// Flags tiles whose noise level departs from the rest of the image.
///
/// A spliced region carries the noise of its source camera or of the
/// retouching brush, which shows up as an outlier against the median tile.
#[derive(Debug, Clone, Copy)]
pub struct NoiseInconsistencyModel {
    /// Tile edge in pixels
    pub block: u32,
    /// Deviation from the median, in MADs, that marks a tile as an outlier
    pub outlier_mads: f64,
    /// Most regions reported as findings
    pub max_regions: usize,
}

impl Default for NoiseInconsistencyModel {
    fn default() -> Self {
        Self {
            block: 32,
            outlier_mads: 4.0,
            max_regions: 5,
        }
    }
}

/// Fewer tiles than this gives no meaningful median.
const MIN_BLOCKS: usize = 4;
/// Past this share of outliers the image is simply heterogeneous.
const MAX_OUTLIER_SHARE: f64 = 0.5;
/// Floor on the MAD, absolute and relative to the median, so evenly
/// textured images do not turn rounding noise into outliers.
const MIN_MAD: f64 = 1e-3;
const MIN_RELATIVE_MAD: f64 = 0.05;

impl ScoringModel for NoiseInconsistencyModel {
    fn name(&self) -> &'static str {
        "noise-inconsistency"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn score(&self, image: &NormalizedImage, cancel: &CancelSignal) -> Result<ModelVerdict, ModelError> {
        let plane = image.luma();
        let blocks = stats::block_noise(&plane, self.block);
        if blocks.len() < MIN_BLOCKS {
            return Ok(ModelVerdict {
                confidence: 0.0,
                findings: Vec::new(),
            });
        }
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }

        let median = stats::median(&mut blocks.iter().map(|b| b.noise).collect::<Vec<_>>());
        let mad = stats::median(&mut blocks.iter().map(|b| (b.noise - median).abs()).collect::<Vec<_>>())
            .max(MIN_MAD)
            .max(median * MIN_RELATIVE_MAD);

        let mut outliers: Vec<_> = blocks
            .iter()
            .map(|block| ((block.noise - median).abs() / mad, block))
            .filter(|(deviation, _)| *deviation > self.outlier_mads)
            .collect();
        outliers.sort_by(|a, b| b.0.total_cmp(&a.0).then((a.1.y, a.1.x).cmp(&(b.1.y, b.1.x))));

        let share = outliers.len() as f64 / blocks.len() as f64;
        let confidence = if outliers.is_empty() {
            0.0
        } else if share > MAX_OUTLIER_SHARE {
            0.2
        } else {
            (0.4 + share * 2.0).min(0.95)
        };

        let findings = outliers
            .iter()
            .take(self.max_regions)
            .map(|(deviation, block)| {
                let strength = (0.5 + (deviation - self.outlier_mads) / 20.0).clamp(0.5, 0.95);
                Finding::new(
                    "noise_inconsistency",
                    Severity::from_confidence(strength),
                    strength,
                    format!(
                        "tile noise {:.4} deviates {:.1} MADs from the image median {:.4}",
                        block.noise, deviation, median
                    ),
                )
                .at(Region {
                    x: block.x,
                    y: block.y,
                    width: block.width,
                    height: block.height,
                })
            })
            .collect();

        Ok(ModelVerdict { confidence, findings })
    }
}
