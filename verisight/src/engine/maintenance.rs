/*!
Periodic cache and store maintenance
*/

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info};

use crate::engine::cache::{CacheStats, ResultCache};
use crate::engine::report_store::SharedReportStore;

/// Events emitted by the maintenance loop
#[derive(Debug, Clone, PartialEq)]
pub enum MaintenanceEvent {
    /// Expired cache entries were dropped
    Purged {
        expired: usize,
        remaining: usize,
        stats: CacheStats,
    },
    /// Expired or foreign rows were deleted from the store
    StoreCleaned { deleted: usize },
    /// Store cleanup failed; the loop keeps running
    StoreError(String),
}

/// Purges the cache (and the store, if any) on a fixed interval.
pub struct CacheJanitor {
    cache: ResultCache,
    store: Option<(SharedReportStore, String)>,
    interval: Duration,
}

impl CacheJanitor {
    pub fn new(cache: ResultCache, interval: Duration) -> Self {
        Self {
            cache,
            store: None,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn with_store(mut self, store: SharedReportStore, engine_digest: String) -> Self {
        self.store = Some((store, engine_digest));
        self
    }

    /// Stream of maintenance events, one round per interval. The first
    /// round runs one interval after the call.
    pub fn events(self) -> impl Stream<Item = MaintenanceEvent> + Send {
        let mut ticks = IntervalStream::new(interval_at(Instant::now() + self.interval, self.interval));

        async_stream::stream! {
            while ticks.next().await.is_some() {
                let expired = self.cache.purge_expired();
                yield MaintenanceEvent::Purged {
                    expired,
                    remaining: self.cache.len(),
                    stats: self.cache.stats(),
                };

                if let Some((store, digest)) = &self.store {
                    let ttl = self.cache.ttl();
                    let digest = digest.clone();
                    match store.call(move |store| store.cleanup_expired(ttl, &digest)).await {
                        Ok(deleted) => yield MaintenanceEvent::StoreCleaned { deleted },
                        Err(e) => {
                            error!("Report store cleanup failed: {}", e);
                            yield MaintenanceEvent::StoreError(e.to_string());
                        }
                    }
                }
            }
        }
    }

    /// Run the loop in the background, logging each event. Abort the
    /// handle to stop it.
    pub fn spawn(self) -> JoinHandle<()> {
        info!("Starting cache maintenance every {:?}", self.interval);
        tokio::spawn(async move {
            let mut events = Box::pin(self.events());
            while let Some(event) = events.next().await {
                match event {
                    MaintenanceEvent::Purged {
                        expired,
                        remaining,
                        stats,
                    } => {
                        if expired > 0 {
                            info!("🧹 Purged {} expired reports, {} remain", expired, remaining);
                        }
                        debug!(
                            "Cache stats: {} hits, {} misses, {} joins, {} computations, {} evictions",
                            stats.hits, stats.misses, stats.joins, stats.computations, stats.evictions
                        );
                    }
                    MaintenanceEvent::StoreCleaned { deleted } => {
                        debug!("Store cleanup removed {} rows", deleted);
                    }
                    MaintenanceEvent::StoreError(_) => {}
                }
            }
        })
    }
}
