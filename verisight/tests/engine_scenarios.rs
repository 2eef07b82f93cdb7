use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use verisight::engine::config::{DetectorKind, EngineConfig};
use verisight::engine::detectors::{CancelSignal, Detector, DetectorRegistry};
use verisight::engine::model::{DetectorCategory, DetectorInfo, DetectorResult, DetectorStatus, Finding, Severity};
use verisight::{AnalysisOptions, EngineError, RiskCategory, RiskEngine};
use verisight_forensics::{ImageMetadata, NormalizedImage};

/// Detector that reports a fixed outcome after an optional delay and
/// counts its invocations.
struct Scripted {
    id: &'static str,
    category: DetectorCategory,
    confidence: Option<f64>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(id: &'static str, category: DetectorCategory, confidence: Option<f64>) -> Self {
        Self {
            id,
            category,
            confidence,
            delay: Duration::ZERO,
            calls: Arc::default(),
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn counted(mut self, calls: &Arc<AtomicUsize>) -> Self {
        self.calls = Arc::clone(calls);
        self
    }
}

#[async_trait]
impl Detector for Scripted {
    fn info(&self) -> DetectorInfo {
        DetectorInfo {
            id: self.id,
            version: "test",
            category: self.category,
        }
    }

    async fn detect(&self, _image: &Arc<NormalizedImage>, _cancel: &CancelSignal) -> DetectorResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match self.confidence {
            Some(confidence) => DetectorResult::completed(
                self.info(),
                confidence,
                vec![Finding::new(
                    format!("{}_probe", self.id),
                    Severity::from_confidence(confidence),
                    confidence,
                    format!("{} probe", self.id),
                )],
            ),
            None => DetectorResult::failed(self.info(), "model unavailable"),
        }
    }
}

fn registry(detectors: Vec<Scripted>) -> DetectorRegistry {
    detectors
        .into_iter()
        .fold(DetectorRegistry::new(), |registry, d| registry.register(Arc::new(d)))
}

fn config(timeout_ms: u64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.detection.timeout_ms = timeout_ms;
    config
}

fn image(seed: u8) -> Arc<NormalizedImage> {
    let pixels = (0..32u32 * 32)
        .flat_map(|i| {
            let v = (i as u8).wrapping_mul(31).wrapping_add(seed);
            [v, v / 2, 255 - v]
        })
        .collect();
    Arc::new(NormalizedImage::from_rgb8(32, 32, pixels, ImageMetadata::default()).unwrap())
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_failure_yields_a_degraded_report() {
    let engine = RiskEngine::with_registry(
        &config(100),
        registry(vec![
            Scripted::new("ai", DetectorCategory::AiGeneration, Some(0.9)),
            Scripted::new("manipulation", DetectorCategory::Manipulation, Some(0.1)),
            Scripted::new("artifact", DetectorCategory::Artifact, Some(0.9)).delayed(Duration::from_secs(30)),
            Scripted::new("metadata", DetectorCategory::Metadata, Some(0.05)),
        ]),
    )
    .await
    .unwrap();

    let report = engine.analyze(image(1)).await.unwrap();

    assert_eq!(report.score, 44);
    assert_eq!(report.category, RiskCategory::Medium);
    assert!(!report.complete);
    assert!(report.explanation.reduced_confidence);
    assert!(report.explanation.summary.contains("Reduced confidence"));
    assert_eq!(report.explanation.dominant_category, Some(DetectorCategory::AiGeneration));

    let artifact = report.summary_for(DetectorCategory::Artifact).unwrap();
    assert!(!artifact.available);
    assert_eq!(artifact.detectors[0].status, DetectorStatus::TimedOut);

    let weights: f64 = report.summaries.iter().map(|s| s.effective_weight).sum();
    assert!((weights - 1.0).abs() < 1e-12);
}

#[tokio::test(flavor = "multi_thread")]
async fn no_available_detector_produces_no_report() {
    let engine = RiskEngine::with_registry(
        &config(50),
        registry(vec![
            Scripted::new("ai", DetectorCategory::AiGeneration, None),
            Scripted::new("manipulation", DetectorCategory::Manipulation, None),
            Scripted::new("artifact", DetectorCategory::Artifact, Some(0.5)).delayed(Duration::from_secs(30)),
            Scripted::new("metadata", DetectorCategory::Metadata, None),
        ]),
    )
    .await
    .unwrap();

    let image = image(2);
    let err = engine.analyze(Arc::clone(&image)).await.unwrap_err();
    assert!(matches!(err, EngineError::AllDetectorsUnavailable { attempted: 4 }));
    assert!(engine.get_cached(image.fingerprint()).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_share_one_computation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(
        RiskEngine::with_registry(
            &config(5_000),
            registry(vec![
                Scripted::new("ai", DetectorCategory::AiGeneration, Some(0.6))
                    .delayed(Duration::from_millis(150))
                    .counted(&calls),
            ]),
        )
        .await
        .unwrap(),
    );

    let image = image(3);
    let handles: Vec<_> = (0..5)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let image = Arc::clone(&image);
            tokio::spawn(async move { engine.analyze(image).await })
        })
        .collect();

    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(reports.iter().all(|r| Arc::ptr_eq(r, &reports[0])));
}

#[tokio::test(flavor = "multi_thread")]
async fn repeat_submission_within_ttl_is_served_from_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = RiskEngine::with_registry(
        &config(5_000),
        registry(vec![
            Scripted::new("manipulation", DetectorCategory::Manipulation, Some(0.8)).counted(&calls),
        ]),
    )
    .await
    .unwrap();

    let image = image(4);
    let first = engine.analyze(Arc::clone(&image)).await.unwrap();
    let second = engine.analyze(Arc::clone(&image)).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*first, *second);
    assert_eq!(engine.get_cached(image.fingerprint()).unwrap().score, first.score);
}

#[tokio::test(flavor = "multi_thread")]
async fn views_change_detail_but_never_the_score() {
    let engine = RiskEngine::with_registry(
        &config(5_000),
        registry(vec![
            Scripted::new("ai", DetectorCategory::AiGeneration, Some(0.3)),
            Scripted::new("metadata", DetectorCategory::Metadata, Some(0.8)),
        ]),
    )
    .await
    .unwrap();

    let report = engine.analyze(image(5)).await.unwrap();
    let brief = engine.view(&report, &AnalysisOptions::default());
    let detailed = engine.view(
        &report,
        &AnalysisOptions {
            detailed_report: true,
            metadata_analysis: false,
        },
    );

    assert_eq!(brief.score, detailed.score);
    assert_eq!(brief.findings.len(), 1);
    assert_eq!(brief.findings[0].category, DetectorCategory::Metadata);
    assert_eq!(detailed.findings.len(), 1);
    assert_eq!(detailed.findings[0].category, DetectorCategory::AiGeneration);
}

#[tokio::test(flavor = "multi_thread")]
async fn builtin_detectors_produce_consistent_reports() {
    let engine = RiskEngine::new(&EngineConfig::default()).await.unwrap();
    assert_eq!(engine.registry().len(), DetectorKind::ALL.len());

    for seed in [0u8, 90, 200] {
        let report = engine.analyze(image(seed)).await.unwrap();
        assert!(report.score <= 100);
        assert!(report.complete);
        assert_eq!(report.category, RiskCategory::from_score(report.score));
        if report.score > 0 {
            assert!(!report.explanation.summary.is_empty());
            assert!(!report.findings.is_empty());
            assert!(!report.explanation.details.is_empty());
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn reports_survive_a_restart_through_the_store() {
    let dir = std::env::temp_dir().join(format!("verisight-store-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let mut config = config(5_000);
    config.cache.store_path = Some(dir.join("reports.sqlite"));
    let detectors = || registry(vec![Scripted::new("ai", DetectorCategory::AiGeneration, Some(0.7))]);

    let image = image(6);
    let engine = RiskEngine::with_registry(&config, detectors()).await.unwrap();
    let original = engine.analyze(Arc::clone(&image)).await.unwrap();
    assert_eq!(engine.shutdown().await.unwrap(), 1);

    let restarted = RiskEngine::with_registry(&config, detectors()).await.unwrap();
    let restored = restarted.get_cached(image.fingerprint()).unwrap();
    assert_eq!(*restored, *original);

    // A different detector set does not reuse the stored rows.
    let other = RiskEngine::with_registry(
        &config,
        registry(vec![Scripted::new("other", DetectorCategory::Manipulation, Some(0.7))]),
    )
    .await
    .unwrap();
    assert!(other.get_cached(image.fingerprint()).is_none());

    drop(restarted);
    drop(other);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreadable_files_fail_individually() {
    use verisight::engine::batch::analyze_files;
    use verisight::engine::error::AnalyzeFileError;
    use futures::StreamExt;

    let engine = RiskEngine::new(&EngineConfig::default()).await.unwrap();
    let garbage = std::env::temp_dir().join(format!("verisight-garbage-{}.png", std::process::id()));
    std::fs::write(&garbage, b"definitely not an image").unwrap();
    let missing = garbage.with_extension("missing");

    let outcomes: Vec<_> = analyze_files(&engine, vec![missing.clone(), garbage.clone()], 2)
        .collect()
        .await;

    assert_eq!(outcomes[0].path, missing);
    assert!(matches!(outcomes[0].outcome, Err(AnalyzeFileError::Read { .. })));
    assert!(matches!(outcomes[1].outcome, Err(AnalyzeFileError::Image { .. })));
    let _ = std::fs::remove_file(&garbage);
}

#[tokio::test(flavor = "multi_thread")]
async fn uncached_assessment_bypasses_the_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = RiskEngine::with_registry(
        &config(5_000),
        registry(vec![
            Scripted::new("ai", DetectorCategory::AiGeneration, Some(0.5)).counted(&calls),
        ]),
    )
    .await
    .unwrap();

    let image = image(7);
    let first = engine.assess_uncached(Arc::clone(&image)).await.unwrap();
    let second = engine.assess_uncached(Arc::clone(&image)).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(first.score, second.score);
    assert!(engine.get_cached(image.fingerprint()).is_none());
    assert!(engine.cache().is_empty());
}
