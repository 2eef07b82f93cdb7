/*!
The scoring engine: cache lookup, detector fan-out, fusion and explanation
*/

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info};
use verisight_forensics::{ImageFingerprint, NormalizeOptions, NormalizedImage};

use crate::engine::{
    aggregator::RiskAggregator,
    assembler::ReportAssembler,
    cache::ResultCache,
    config::EngineConfig,
    detectors::DetectorRegistry,
    error::EngineError,
    explain::{ExplainabilityComposer, collect_findings},
    maintenance::CacheJanitor,
    orchestrator::DetectorOrchestrator,
    report::{AnalysisOptions, ReportView, RiskReport},
    report_store::SharedReportStore,
};

/// Everything needed to turn an image into a report. Shared with the
/// cache's compute futures.
struct Pipeline {
    orchestrator: DetectorOrchestrator,
    registry: DetectorRegistry,
    timeout: Duration,
    aggregator: RiskAggregator,
    composer: ExplainabilityComposer,
    assembler: ReportAssembler,
}

impl Pipeline {
    async fn assess(&self, image: Arc<NormalizedImage>) -> Result<RiskReport, EngineError> {
        let started = Instant::now();
        let results = self
            .orchestrator
            .run(&image, self.registry.detectors(), self.timeout)
            .await?;

        let breakdown = self.aggregator.score(&results);
        let findings = collect_findings(&results);
        let explanation = self.composer.explain(&results, &findings, &breakdown);
        let report = self.assembler.assemble(
            *image.fingerprint(),
            &results,
            breakdown,
            findings,
            explanation,
            started.elapsed(),
        );

        info!(
            "🔍 {} scored {} ({}){}",
            report.fingerprint.short(),
            report.score,
            report.category,
            if report.complete { "" } else { " with reduced confidence" }
        );
        Ok(report)
    }
}

/// Owns the cache, the optional report store and the detection pipeline.
///
/// Created with [`RiskEngine::new`], which warms the cache from the store,
/// and torn down with [`RiskEngine::shutdown`], which flushes it back.
pub struct RiskEngine {
    pipeline: Arc<Pipeline>,
    cache: ResultCache,
    store: Option<SharedReportStore>,
    engine_digest: String,
    normalize: NormalizeOptions,
    min_confidence: f64,
    purge_interval: Duration,
}

impl RiskEngine {
    /// Engine with the built-in detectors enabled in `config`.
    pub async fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        Self::with_registry(config, DetectorRegistry::builtin(&config.detection)).await
    }

    /// Engine with an explicit detector registry.
    pub async fn with_registry(config: &EngineConfig, registry: DetectorRegistry) -> Result<Self, EngineError> {
        info!("Initializing risk engine with {} detectors...", registry.len());

        let engine_digest = registry.digest();
        let cache = ResultCache::from_config(&config.cache);

        let store = match &config.cache.store_path {
            Some(path) => {
                let store = SharedReportStore::open(path.clone()).await?;
                let ttl = cache.ttl();
                let digest = engine_digest.clone();
                let fresh = store
                    .call(move |store| {
                        store.cleanup_expired(ttl, &digest)?;
                        store.load_fresh(ttl, &digest)
                    })
                    .await?;
                let restored = cache.restore(fresh);
                info!("💾 Warmed cache with {} stored reports", restored);
                Some(store)
            }
            None => None,
        };

        let pipeline = Pipeline {
            orchestrator: DetectorOrchestrator::new(&config.detection),
            registry,
            timeout: config.detection.timeout(),
            aggregator: RiskAggregator::new(),
            composer: ExplainabilityComposer::from_config(&config.explain),
            assembler: ReportAssembler,
        };

        Ok(Self {
            pipeline: Arc::new(pipeline),
            cache,
            store,
            engine_digest,
            normalize: config.normalize.options(),
            min_confidence: config.explain.min_confidence,
            purge_interval: config.cache.purge_interval(),
        })
    }

    /// Score an image, reusing the cached report for its fingerprint.
    ///
    /// Concurrent calls for the same fingerprint share one computation.
    pub async fn analyze(&self, image: Arc<NormalizedImage>) -> Result<Arc<RiskReport>, EngineError> {
        let fingerprint = *image.fingerprint();
        let pipeline = Arc::clone(&self.pipeline);

        self.cache
            .get_or_compute(fingerprint, move || async move { pipeline.assess(image).await })
            .await
            .map_err(|e| {
                if let EngineError::AllDetectorsUnavailable { attempted } = e.root_cause() {
                    return EngineError::AllDetectorsUnavailable { attempted: *attempted };
                }
                e
            })
    }

    /// Score an image without consulting or filling the cache.
    pub async fn assess_uncached(&self, image: Arc<NormalizedImage>) -> Result<RiskReport, EngineError> {
        self.pipeline.assess(image).await
    }

    pub fn get_cached(&self, fingerprint: &ImageFingerprint) -> Option<Arc<RiskReport>> {
        self.cache.get(fingerprint)
    }

    /// The view of `report` requested by `options`.
    pub fn view<'a>(&self, report: &'a RiskReport, options: &AnalysisOptions) -> ReportView<'a> {
        report.view(options, self.min_confidence)
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.pipeline.registry
    }

    /// Digest of the detector set; stored reports from another digest are
    /// not reused.
    pub fn engine_digest(&self) -> &str {
        &self.engine_digest
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        self.normalize
    }

    /// Start the background purge loop.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let janitor = CacheJanitor::new(self.cache.clone(), self.purge_interval);
        match &self.store {
            Some(store) => janitor.with_store(store.clone(), self.engine_digest.clone()),
            None => janitor,
        }
        .spawn()
    }

    /// Flush live cache entries to the store, then clear the cache.
    /// Returns how many reports were persisted.
    pub async fn shutdown(self) -> Result<usize, EngineError> {
        info!("🛑 Shutting down risk engine...");
        let snapshot = self.cache.snapshot();
        let flushed = match &self.store {
            Some(store) if !snapshot.is_empty() => {
                let digest = self.engine_digest.clone();
                store.call(move |store| store.save_all(&snapshot, &digest)).await?
            }
            Some(_) => 0,
            None => {
                if !snapshot.is_empty() {
                    debug!("No report store configured; dropping {} cached reports", snapshot.len());
                }
                0
            }
        };
        self.cache.clear();
        info!("✅ Shutdown complete, {} reports persisted", flushed);
        Ok(flushed)
    }
}
