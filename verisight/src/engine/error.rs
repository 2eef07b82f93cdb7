/*!
Error types for the scoring engine
*/

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use verisight_forensics::{ForensicsError, ImageFingerprint};

/// Why a single detector produced no usable signal.
///
/// Recovered locally: the orchestrator records it on the detector's result
/// and the aggregator renormalizes around the missing category.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("detector {detector} timed out after {elapsed_ms} ms")]
    Timeout { detector: String, elapsed_ms: u64 },

    #[error("detector {detector} failed: {reason}")]
    Failure { detector: String, reason: String },
}

/// Request-level failures.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No detector completed, so there is nothing to score.
    #[error("all {attempted} detectors were unavailable; no report was produced")]
    AllDetectorsUnavailable { attempted: usize },

    /// The cached computation for a fingerprint failed. Not cached; the
    /// next request for the same fingerprint recomputes.
    #[error("computing the report for {fingerprint} failed: {source}")]
    CacheComputeFailure {
        fingerprint: ImageFingerprint,
        #[source]
        source: Arc<EngineError>,
    },

    /// The computation task panicked or was cancelled.
    #[error("report computation aborted: {0}")]
    ComputeAborted(String),

    #[error("report store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// The innermost error, looking through cache wrapping.
    pub fn root_cause(&self) -> &EngineError {
        match self {
            EngineError::CacheComputeFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_all_detectors_unavailable(&self) -> bool {
        matches!(self.root_cause(), EngineError::AllDetectorsUnavailable { .. })
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("report encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("store worker failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Failure to analyze one file from the command line.
#[derive(Error, Debug)]
pub enum AnalyzeFileError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a usable image: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: ForensicsError,
    },

    #[error("normalizing {path} failed: {reason}")]
    Worker { path: PathBuf, reason: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}
