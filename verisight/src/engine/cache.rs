/*!
Content-addressed report cache with TTL, LRU capacity and single-flight
computation
*/

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tracing::debug;
use verisight_forensics::ImageFingerprint;

use crate::engine::config::CacheConfig;
use crate::engine::error::EngineError;
use crate::engine::report::RiskReport;

type ComputeOutcome = Result<Arc<RiskReport>, Arc<EngineError>>;
type SharedCompute = Shared<BoxFuture<'static, ComputeOutcome>>;

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that attached to a computation already in flight
    pub joins: u64,
    pub computations: u64,
    pub failures: u64,
    /// Entries dropped to respect the capacity bound
    pub evictions: u64,
    /// Entries dropped after their TTL ran out
    pub expirations: u64,
}

struct CacheEntry {
    report: Arc<RiskReport>,
    expires_at: Instant,
    last_used: u64,
}

struct InFlight {
    id: u64,
    future: SharedCompute,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<ImageFingerprint, CacheEntry>,
    /// `last_used` tick -> fingerprint, oldest first
    recency: BTreeMap<u64, ImageFingerprint>,
    in_flight: HashMap<ImageFingerprint, InFlight>,
    tick: u64,
    /// Bumped by `clear`; computations started under an older epoch do not
    /// publish their result.
    epoch: u64,
    stats: CacheStats,
}

struct CacheInner {
    ttl: Duration,
    capacity: Option<usize>,
    state: Mutex<CacheState>,
}

/// Shared handle to the report cache. Clones refer to the same cache.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<CacheInner>,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                ttl,
                capacity: capacity.map(|c| c.max(1)),
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl(), config.capacity)
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn capacity(&self) -> Option<usize> {
        self.inner.capacity
    }

    /// Return the cached report for `fingerprint`, or compute it.
    ///
    /// At most one computation per fingerprint runs at a time; concurrent
    /// callers wait for it and receive the same `Arc`. The computation runs
    /// on its own task, so it completes and publishes even if every caller
    /// goes away. A failed or panicking computation is not cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: ImageFingerprint,
        compute: F,
    ) -> Result<Arc<RiskReport>, EngineError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<RiskReport, EngineError>> + Send + 'static,
    {
        let future = {
            let mut state = self.inner.lock();
            if let Some(report) = state.lookup(&fingerprint, Instant::now()) {
                state.stats.hits += 1;
                debug!("Cache hit for {}", fingerprint.short());
                return Ok(report);
            }

            if let Some(flight) = state.in_flight.get(&fingerprint) {
                let future = flight.future.clone();
                state.stats.joins += 1;
                debug!("Joining in-flight computation for {}", fingerprint.short());
                future
            } else {
                state.stats.misses += 1;
                state.stats.computations += 1;
                let id = state.next_tick();
                let epoch = state.epoch;

                let guard = FlightGuard {
                    inner: Arc::clone(&self.inner),
                    fingerprint,
                    id,
                };
                let task = tokio::spawn(async move {
                    let outcome = match AssertUnwindSafe(async move { compute().await }).catch_unwind().await {
                        Ok(result) => result.map(Arc::new).map_err(Arc::new),
                        Err(payload) => Err(Arc::new(EngineError::ComputeAborted(panic_message(&*payload)))),
                    };
                    guard.inner.publish(fingerprint, epoch, &outcome);
                    drop(guard);
                    outcome
                });
                let future = task
                    .map(|joined| match joined {
                        Ok(outcome) => outcome,
                        Err(e) => Err(Arc::new(EngineError::ComputeAborted(e.to_string()))),
                    })
                    .boxed()
                    .shared();

                debug!("Cache miss for {}, computing", fingerprint.short());
                state.in_flight.insert(
                    fingerprint,
                    InFlight {
                        id,
                        future: future.clone(),
                    },
                );
                future
            }
        };

        future
            .await
            .map_err(|source| EngineError::CacheComputeFailure { fingerprint, source })
    }

    /// Cached report within TTL, without computing.
    pub fn get(&self, fingerprint: &ImageFingerprint) -> Option<Arc<RiskReport>> {
        let mut state = self.inner.lock();
        let found = state.lookup(fingerprint, Instant::now());
        if found.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        found
    }

    /// Drop the entry for `fingerprint`. A computation in flight for it is
    /// left alone.
    pub fn invalidate(&self, fingerprint: &ImageFingerprint) -> bool {
        self.inner.lock().remove(fingerprint).is_some()
    }

    /// Drop every entry. Computations in flight still answer their callers
    /// but are not stored.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.entries.clear();
        state.recency.clear();
        state.in_flight.clear();
        state.epoch += 1;
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.lock();
        let expired: Vec<ImageFingerprint> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(fingerprint, _)| *fingerprint)
            .collect();
        for fingerprint in &expired {
            state.remove(fingerprint);
        }
        state.stats.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Computations currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// Unexpired reports, least recently used first.
    pub fn snapshot(&self) -> Vec<Arc<RiskReport>> {
        let now = Instant::now();
        let state = self.inner.lock();
        state
            .recency
            .values()
            .filter_map(|fingerprint| state.entries.get(fingerprint))
            .filter(|entry| entry.expires_at > now)
            .map(|entry| Arc::clone(&entry.report))
            .collect()
    }

    /// Insert previously persisted reports, aging them by their creation
    /// time. Reports already past the TTL are skipped. Returns how many
    /// were restored.
    pub fn restore<I>(&self, reports: I) -> usize
    where
        I: IntoIterator<Item = Arc<RiskReport>>,
    {
        let now = Instant::now();
        let wall_now = Utc::now();
        let ttl = self.inner.ttl;
        let mut state = self.inner.lock();
        let mut restored = 0;

        for report in reports {
            let age = (wall_now - report.created_at).to_std().unwrap_or(Duration::ZERO);
            let Some(remaining) = ttl.checked_sub(age).filter(|r| !r.is_zero()) else {
                continue;
            };
            let fingerprint = report.fingerprint;
            state.insert(fingerprint, report, now + remaining, self.inner.capacity);
            restored += 1;
        }
        restored
    }
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the outcome of a computation started under `epoch`.
    fn publish(&self, fingerprint: ImageFingerprint, epoch: u64, outcome: &ComputeOutcome) {
        let mut state = self.lock();
        match outcome {
            Ok(report) if state.epoch == epoch => {
                let expires_at = Instant::now() + self.ttl;
                state.insert(fingerprint, Arc::clone(report), expires_at, self.capacity);
            }
            Ok(_) => debug!("Discarding report for {} computed before a clear", fingerprint.short()),
            Err(error) => {
                state.stats.failures += 1;
                debug!("Computation for {} failed, not caching: {}", fingerprint.short(), error);
            }
        }
    }

    /// Forget computation `id`, unless a newer one already replaced it.
    fn retire(&self, fingerprint: &ImageFingerprint, id: u64) {
        let mut state = self.lock();
        if state.in_flight.get(fingerprint).is_some_and(|f| f.id == id) {
            state.in_flight.remove(fingerprint);
        }
    }
}

/// Removes a computation from the in-flight map however its task ends.
struct FlightGuard {
    inner: Arc<CacheInner>,
    fingerprint: ImageFingerprint,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.retire(&self.fingerprint, self.id);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("panicked: {message}")
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Live entry for `fingerprint`, refreshing its recency. Expired
    /// entries are dropped on sight.
    fn lookup(&mut self, fingerprint: &ImageFingerprint, now: Instant) -> Option<Arc<RiskReport>> {
        let expired = self.entries.get(fingerprint)?.expires_at <= now;
        if expired {
            self.remove(fingerprint);
            self.stats.expirations += 1;
            return None;
        }

        let tick = self.next_tick();
        let entry = self.entries.get_mut(fingerprint)?;
        let previous = std::mem::replace(&mut entry.last_used, tick);
        let report = Arc::clone(&entry.report);
        self.recency.remove(&previous);
        self.recency.insert(tick, *fingerprint);
        Some(report)
    }

    fn insert(
        &mut self,
        fingerprint: ImageFingerprint,
        report: Arc<RiskReport>,
        expires_at: Instant,
        capacity: Option<usize>,
    ) {
        self.remove(&fingerprint);
        let tick = self.next_tick();
        self.entries.insert(
            fingerprint,
            CacheEntry {
                report,
                expires_at,
                last_used: tick,
            },
        );
        self.recency.insert(tick, fingerprint);

        if let Some(capacity) = capacity {
            while self.entries.len() > capacity {
                let Some((_, oldest)) = self.recency.pop_first() else {
                    break;
                };
                self.entries.remove(&oldest);
                self.stats.evictions += 1;
                debug!("Evicted least recently used report {}", oldest.short());
            }
        }
    }

    fn remove(&mut self, fingerprint: &ImageFingerprint) -> Option<CacheEntry> {
        let entry = self.entries.remove(fingerprint)?;
        self.recency.remove(&entry.last_used);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::engine::report::{Explanation, RiskCategory};

    fn report(fingerprint: ImageFingerprint, score: u8) -> RiskReport {
        RiskReport {
            fingerprint,
            score,
            category: RiskCategory::from_score(score),
            summaries: vec![],
            findings: vec![],
            explanation: Explanation {
                summary: "cached".into(),
                details: vec![],
                recommendation: "none".into(),
                dominant_category: None,
                reduced_confidence: false,
            },
            complete: true,
            processing_ms: 1,
            created_at: Utc::now(),
        }
    }

    fn fp(tag: &str) -> ImageFingerprint {
        ImageFingerprint::of_content(tag.as_bytes())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_computation() {
        let cache = ResultCache::new(Duration::from_secs(60), None);
        let calls = Arc::new(AtomicUsize::new(0));
        let key = fp("shared");

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let cache = cache.clone();
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_compute(key, move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok(report(key, 12))
                        })
                        .await
                })
            })
            .collect();

        let mut reports = Vec::new();
        for handle in handles {
            reports.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(reports.iter().all(|r| Arc::ptr_eq(r, &reports[0])));
        let stats = cache.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.joins + stats.hits, 4);
    }

    #[tokio::test]
    async fn hit_within_ttl_skips_computation() {
        let cache = ResultCache::new(Duration::from_secs(60), None);
        let key = fp("hit");
        let first = cache.get_or_compute(key, move || async move { Ok(report(key, 5)) }).await.unwrap();
        let second = cache
            .get_or_compute(key, || async { Err(EngineError::AllDetectorsUnavailable { attempted: 0 }) })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = ResultCache::new(Duration::from_secs(60), None);
        let key = fp("flaky");

        let err = cache
            .get_or_compute(key, || async {
                Err(EngineError::AllDetectorsUnavailable { attempted: 4 })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CacheComputeFailure { .. }));
        assert!(err.is_all_detectors_unavailable());
        assert!(cache.is_empty());

        let retried = cache.get_or_compute(key, move || async move { Ok(report(key, 7)) }).await.unwrap();
        assert_eq!(retried.score, 7);
        assert_eq!(cache.stats().computations, 2);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn panicking_compute_is_retried() {
        let cache = ResultCache::new(Duration::from_secs(60), None);
        let key = fp("panics");

        let err = cache
            .get_or_compute(key, move || async move {
                if key == fp("panics") {
                    panic!("model crashed");
                }
                Ok(report(key, 1))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CacheComputeFailure { .. }));
        assert!(matches!(err.root_cause(), EngineError::ComputeAborted(m) if m.contains("model crashed")));
        assert_eq!(cache.in_flight(), 0);
        assert!(cache.is_empty());

        let retried = cache.get_or_compute(key, move || async move { Ok(report(key, 7)) }).await.unwrap();
        assert_eq!(retried.score, 7);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn abandoned_computation_still_publishes() {
        let cache = ResultCache::new(Duration::from_secs(60), None);
        let key = fp("abandoned");

        let caller = tokio::time::timeout(
            Duration::from_millis(20),
            cache.get_or_compute(key, move || async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(report(key, 9))
            }),
        )
        .await;
        assert!(caller.is_err());
        assert_eq!(cache.in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.get(&key).unwrap().score, 9);
    }

    #[tokio::test]
    async fn invalidated_entry_is_recomputed() {
        let cache = ResultCache::new(Duration::from_secs(60), None);
        let key = fp("stale");
        cache.get_or_compute(key, move || async move { Ok(report(key, 2)) }).await.unwrap();

        assert!(cache.invalidate(&key));
        assert!(!cache.invalidate(&key));
        let fresh = cache.get_or_compute(key, move || async move { Ok(report(key, 4)) }).await.unwrap();
        assert_eq!(fresh.score, 4);
        assert_eq!(cache.stats().computations, 2);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = ResultCache::new(Duration::from_millis(50), None);
        let key = fp("short-lived");
        cache.get_or_compute(key, move || async move { Ok(report(key, 1)) }).await.unwrap();
        assert!(cache.get(&key).is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn least_recently_used_is_evicted() {
        let cache = ResultCache::new(Duration::from_secs(60), Some(2));
        let (a, b, c) = (fp("a"), fp("b"), fp("c"));
        for key in [a, b] {
            cache.get_or_compute(key, move || async move { Ok(report(key, 1)) }).await.unwrap();
        }
        // Touch `a` so `b` becomes the oldest.
        assert!(cache.get(&a).is_some());
        cache.get_or_compute(c, move || async move { Ok(report(c, 1)) }).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let cache = ResultCache::new(Duration::from_secs(60), None);
        let old = report(fp("old"), 1);
        let old = RiskReport {
            created_at: Utc::now() - chrono::Duration::seconds(59),
            ..old
        };
        let restored = cache.restore(vec![Arc::new(old), Arc::new(report(fp("new"), 2))]);
        assert_eq!(restored, 2);

        // Too old to restore at all.
        let stale = RiskReport {
            created_at: Utc::now() - chrono::Duration::seconds(61),
            ..report(fp("stale"), 3)
        };
        assert_eq!(cache.restore(vec![Arc::new(stale)]), 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&fp("new")).is_some());
    }

    #[tokio::test]
    async fn clear_discards_results_of_running_computations() {
        let cache = ResultCache::new(Duration::from_secs(60), None);
        let key = fp("cleared");
        let background = cache.clone();
        let task = tokio::spawn(async move {
            background
                .get_or_compute(key, move || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(report(key, 3))
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear();
        assert_eq!(task.await.unwrap().unwrap().score, 3);
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn snapshot_lists_oldest_first() {
        let cache = ResultCache::new(Duration::from_secs(60), None);
        for tag in ["first", "second"] {
            let key = fp(tag);
            cache.get_or_compute(key, move || async move { Ok(report(key, 1)) }).await.unwrap();
        }
        cache.get(&fp("first"));
        let order: Vec<_> = cache.snapshot().iter().map(|r| r.fingerprint).collect();
        assert_eq!(order, vec![fp("second"), fp("first")]);
    }
}
