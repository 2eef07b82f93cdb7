/*!
SQLite persistence for cached risk reports
*/

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::engine::error::StoreError;
use crate::engine::report::RiskReport;

/// Persists cache entries between runs.
///
/// Calls block on SQLite; async callers go through `spawn_blocking`.
///
/// Each row is keyed by fingerprint and tagged with the digest of the
/// detector set that produced it; rows from another digest are ignored.
pub struct ReportStore {
    conn: Connection,
}

impl ReportStore {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Could not create store directory {:?}: {}", parent, e);
            }
        }
        let store = Self {
            conn: Connection::open(path)?,
        };
        store.initialize_schema()?;
        info!("Report store opened at {:?}", path);
        Ok(store)
    }

    /// Store backed by an in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS risk_reports (
                fingerprint TEXT PRIMARY KEY,
                engine_digest TEXT NOT NULL,
                report TEXT NOT NULL, -- JSON
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reports_created_at ON risk_reports(created_at);
        "#,
        )?;
        Ok(())
    }

    /// Write all `reports` in one transaction, replacing rows for the same
    /// fingerprint.
    pub fn save_all(&self, reports: &[Arc<RiskReport>], engine_digest: &str) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO risk_reports (fingerprint, engine_digest, report, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for report in reports {
                stmt.execute((
                    report.fingerprint.to_hex(),
                    engine_digest,
                    serde_json::to_string(report.as_ref())?,
                    report.created_at.timestamp_millis(),
                ))?;
            }
        }
        tx.commit()?;

        debug!("Flushed {} reports to the store", reports.len());
        Ok(reports.len())
    }

    /// Reports younger than `ttl` computed under `engine_digest`, oldest
    /// first. Rows that no longer decode are skipped.
    pub fn load_fresh(&self, ttl: Duration, engine_digest: &str) -> Result<Vec<Arc<RiskReport>>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT report FROM risk_reports
             WHERE engine_digest = ?1 AND created_at > ?2
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map((engine_digest, cutoff_millis(ttl)), |row| row.get::<_, String>(0))?;

        let mut reports = Vec::new();
        for row in rows {
            match serde_json::from_str::<RiskReport>(&row?) {
                Ok(report) => reports.push(Arc::new(report)),
                Err(e) => warn!("Skipping undecodable stored report: {}", e),
            }
        }

        debug!("Loaded {} fresh reports from the store", reports.len());
        Ok(reports)
    }

    /// Delete rows older than `ttl` or from another engine digest.
    pub fn cleanup_expired(&self, ttl: Duration, engine_digest: &str) -> Result<usize, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM risk_reports WHERE created_at <= ?1 OR engine_digest != ?2",
            (cutoff_millis(ttl), engine_digest),
        )?;
        if deleted > 0 {
            info!("Cleaned up {} expired stored reports", deleted);
        }
        Ok(deleted)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM risk_reports", ())?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM risk_reports", (), |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// A [`ReportStore`] shared between the engine and its maintenance task.
#[derive(Clone)]
pub struct SharedReportStore(Arc<Mutex<ReportStore>>);

impl SharedReportStore {
    pub fn new(store: ReportStore) -> Self {
        Self(Arc::new(Mutex::new(store)))
    }

    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        let store = tokio::task::spawn_blocking(move || ReportStore::open(path))
            .await
            .map_err(|e| StoreError::Worker(e.to_string()))??;
        Ok(Self::new(store))
    }

    /// Run `op` against the store on the blocking pool.
    pub async fn call<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&ReportStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || {
            let store = inner.lock().unwrap_or_else(PoisonError::into_inner);
            op(&store)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

fn cutoff_millis(ttl: Duration) -> i64 {
    chrono::Utc::now().timestamp_millis() - ttl.as_millis().min(i64::MAX as u128) as i64
}
