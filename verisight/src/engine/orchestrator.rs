/*!
Concurrent detector dispatch with per-detector deadlines
*/

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use verisight_forensics::NormalizedImage;

use crate::engine::config::DetectionConfig;
use crate::engine::detectors::{CancelSignal, Detector};
use crate::engine::error::{DetectorError, EngineError};
use crate::engine::model::{DetectorResult, DetectorStatus};

/// Fans one image out to every registered detector.
///
/// Holds no per-request state. The semaphore is shared by every submission
/// going through this orchestrator, so `limit` bounds detector work across
/// the whole engine. A detector's deadline covers the time spent waiting
/// for a permit. A timed-out detector keeps its permit until it has
/// observed cancellation, or until a second deadline passes and its task is
/// aborted.
#[derive(Debug, Clone)]
pub struct DetectorOrchestrator {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl DetectorOrchestrator {
    pub fn new(config: &DetectionConfig) -> Self {
        Self::with_limit(config.max_concurrent_detectors)
    }

    pub fn with_limit(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run every detector against `image` and wait for all of them to
    /// complete, fail or time out. Results keep the order of `detectors`.
    pub async fn run(
        &self,
        image: &Arc<NormalizedImage>,
        detectors: &[Arc<dyn Detector>],
        timeout: Duration,
    ) -> Result<Vec<DetectorResult>, EngineError> {
        debug!(
            "Dispatching {} detectors for {} (timeout {:?})",
            detectors.len(),
            image.fingerprint().short(),
            timeout
        );

        let results = join_all(
            detectors
                .iter()
                .map(|detector| self.dispatch(Arc::clone(detector), Arc::clone(image), timeout)),
        )
        .await;

        let available = results.iter().filter(|r| r.is_available()).count();
        if available == 0 {
            warn!(
                "No detector produced a signal for {} ({} attempted)",
                image.fingerprint().short(),
                results.len()
            );
            return Err(EngineError::AllDetectorsUnavailable {
                attempted: results.len(),
            });
        }

        debug!("{}/{} detectors available", available, results.len());
        Ok(results)
    }

    async fn dispatch(
        &self,
        detector: Arc<dyn Detector>,
        image: Arc<NormalizedImage>,
        timeout: Duration,
    ) -> DetectorResult {
        let info = detector.info();
        let started = Instant::now();
        let cancel = CancelSignal::new();

        let permits = Arc::clone(&self.permits);
        let task_cancel = cancel.clone();
        let mut handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            Some(detector.detect(&image, &task_cancel).await)
        });

        let outcome = tokio::time::timeout(timeout, &mut handle).await;
        let result = match outcome {
            Ok(Ok(Some(result))) => validate(result),
            Ok(Ok(None)) => DetectorResult::failed(info, "detector pool is closed"),
            Ok(Err(join_error)) => {
                let error = DetectorError::Failure {
                    detector: info.id.to_string(),
                    reason: if join_error.is_panic() {
                        "detector panicked".to_string()
                    } else {
                        join_error.to_string()
                    },
                };
                warn!("{}", error);
                DetectorResult::failed(info, error.to_string())
            }
            Err(_) => {
                cancel.cancel();
                tokio::spawn(drain(info.id, handle, timeout));
                let error = DetectorError::Timeout {
                    detector: info.id.to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                warn!("{}", error);
                DetectorResult::timed_out(info, error.to_string())
            }
        };

        debug!(
            "Detector {} finished as {:?} in {:?}",
            info.id,
            result.status,
            started.elapsed()
        );
        DetectorResult { info, ..result }.with_elapsed(started.elapsed())
    }
}

/// Let a timed-out detector wind down while it still holds its permit.
async fn drain(detector: &'static str, mut handle: JoinHandle<Option<DetectorResult>>, grace: Duration) {
    let finished = tokio::time::timeout(grace, &mut handle).await;
    if finished.is_err() {
        handle.abort();
        warn!("Detector {} ignored cancellation, aborting it", detector);
    }
}

/// A completed result must carry a confidence in `[0, 1]`; anything else
/// is demoted to a failure. Non-completed results never carry one.
fn validate(result: DetectorResult) -> DetectorResult {
    match (result.status, result.confidence) {
        (DetectorStatus::Completed, Some(c)) if c.is_finite() && (0.0..=1.0).contains(&c) => result,
        (DetectorStatus::Completed, confidence) => {
            let reason = format!("reported an invalid confidence ({confidence:?})");
            warn!("Detector {} {}", result.info.id, reason);
            DetectorResult::failed(result.info, reason)
        }
        _ => DetectorResult {
            confidence: None,
            findings: Vec::new(),
            ..result
        },
    }
}
