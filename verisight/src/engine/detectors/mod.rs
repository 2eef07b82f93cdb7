/*!
Detector adapters: the uniform detection contract and the built-in registry
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use verisight_forensics::NormalizedImage;

use crate::engine::config::{DetectionConfig, DetectorKind};
use crate::engine::model::{DetectorCategory, DetectorInfo, DetectorResult, Finding, clamp_unit};

pub mod ai_generation;
pub mod artifact;
pub mod manipulation;
pub mod metadata;

pub use ai_generation::{AiGenerationDetector, SpectralSmoothnessModel};
pub use artifact::ArtifactAnalyzer;
pub use manipulation::{ManipulationDetector, NoiseInconsistencyModel};
pub use metadata::MetadataInspector;

/// Trait for detection adapters
///
/// An adapter reads the shared image and reports a [`DetectorResult`]. It
/// never panics or errors out on model failure; it returns
/// [`DetectorResult::failed`] instead. Deadlines are enforced by the
/// orchestrator; adapters only need to poll the [`CancelSignal`] between
/// expensive stages.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Identity, version and category of this detector
    fn info(&self) -> DetectorInfo;

    /// Analyze one normalized image
    async fn detect(&self, image: &Arc<NormalizedImage>, cancel: &CancelSignal) -> DetectorResult;
}

/// Best-effort cancellation flag shared between the orchestrator and one
/// running adapter.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Opaque scoring function behind a model-backed detector.
///
/// Trained weights live behind this trait; the engine only sees a
/// confidence and a list of findings.
pub trait ScoringModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str;

    /// Score one image. Runs on a blocking thread.
    fn score(&self, image: &NormalizedImage, cancel: &CancelSignal) -> Result<ModelVerdict, ModelError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelVerdict {
    pub confidence: f64,
    pub findings: Vec<Finding>,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("cancelled before completion")]
    Cancelled,

    #[error("inference failed: {0}")]
    Inference(String),
}

/// Run a scoring model off the async runtime and wrap its verdict.
pub(crate) async fn score_with_model(
    info: DetectorInfo,
    model: &Arc<dyn ScoringModel>,
    image: &Arc<NormalizedImage>,
    cancel: &CancelSignal,
) -> DetectorResult {
    let model = Arc::clone(model);
    let image = Arc::clone(image);
    let cancel = cancel.clone();

    match tokio::task::spawn_blocking(move || model.score(&image, &cancel)).await {
        Ok(Ok(verdict)) => {
            DetectorResult::completed(info, clamp_unit(verdict.confidence), verdict.findings)
        }
        Ok(Err(e)) => DetectorResult::failed(info, e.to_string()),
        Err(e) => DetectorResult::failed(info, format!("model worker aborted: {e}")),
    }
}

/// Build the built-in adapter for a kind.
pub fn builtin(kind: DetectorKind) -> Arc<dyn Detector> {
    match kind {
        DetectorKind::AiGeneration => Arc::new(AiGenerationDetector::builtin()),
        DetectorKind::Manipulation => Arc::new(ManipulationDetector::builtin()),
        DetectorKind::Artifact => Arc::new(ArtifactAnalyzer),
        DetectorKind::Metadata => Arc::new(MetadataInspector),
    }
}

/// Ordered set of detectors dispatched for every submission.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in detectors, filtered by configuration.
    pub fn builtin(config: &DetectionConfig) -> Self {
        let registry = DetectorKind::ALL
            .iter()
            .filter(|kind| config.enabled.contains(kind))
            .fold(Self::new(), |registry, kind| registry.register(builtin(*kind)));

        info!("Initialized detector registry with {} detectors", registry.len());
        registry
    }

    pub fn register(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn detectors(&self) -> &[Arc<dyn Detector>] {
        &self.detectors
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Digest over detector identities and the base weights. Persisted
    /// reports computed under a different digest are not reused.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for detector in &self.detectors {
            let info = detector.info();
            hasher.update(info.id.as_bytes());
            hasher.update(b"@");
            hasher.update(info.version.as_bytes());
            hasher.update(info.category.key().as_bytes());
            hasher.update(b"\n");
        }
        for category in DetectorCategory::ALL {
            hasher.update(&category.base_weight().to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}
