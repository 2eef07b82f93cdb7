/*!
Configuration management for the scoring engine
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use verisight_forensics::NormalizeOptions;

use crate::engine::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Detector dispatch settings
    pub detection: DetectionConfig,
    /// Result cache and persistence settings
    pub cache: CacheConfig,
    /// Explanation shaping
    pub explain: ExplainConfig,
    /// Image normalization applied before detection
    pub normalize: NormalizeConfig,
    /// Report sinks
    pub outputs: Vec<OutputConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Deadline for each detector, in milliseconds
    pub timeout_ms: u64,
    /// Detectors allowed to run at once across all submissions
    pub max_concurrent_detectors: usize,
    /// Built-in detectors to register
    pub enabled: Vec<DetectorKind>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a finished report stays valid, in seconds
    pub ttl_secs: u64,
    /// Maximum number of cached reports; least recently used go first
    pub capacity: Option<usize>,
    /// How often expired entries are purged, in seconds
    pub purge_interval_secs: u64,
    /// SQLite file the cache is flushed to on shutdown and warmed from on start
    pub store_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExplainConfig {
    /// Findings below this confidence are left out of the explanation
    pub min_confidence: f64,
    /// Upper bound on explanation detail lines
    pub max_details: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Longest edge after normalization, in pixels
    pub max_dimension: u32,
}

/// Statically known detector implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    AiGeneration,
    Manipulation,
    Artifact,
    Metadata,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 4] = [
        DetectorKind::AiGeneration,
        DetectorKind::Manipulation,
        DetectorKind::Artifact,
        DetectorKind::Metadata,
    ];
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Output plugin type
    pub plugin: OutputPlugin,
    /// Whether this output is enabled
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputPlugin {
    Json { path: PathBuf, pretty: bool },
    Webhook { url: String, auth_token: Option<String> },
    Terminal { format: TerminalFormat },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalFormat {
    Plain,
    Colored,
    Json,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_concurrent_detectors: 4,
            enabled: DetectorKind::ALL.to_vec(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60 * 60,
            capacity: Some(1024),
            purge_interval_secs: 60,
            store_path: None,
        }
    }
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            max_details: 10,
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_dimension: NormalizeOptions::default().max_dimension,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            plugin: OutputPlugin::Terminal {
                format: TerminalFormat::Plain,
            },
            enabled: true,
        }
    }
}

impl DetectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

impl NormalizeConfig {
    pub fn options(&self) -> NormalizeOptions {
        NormalizeOptions {
            max_dimension: self.max_dimension,
        }
    }
}

impl EngineConfig {
    /// `$XDG_CONFIG_HOME/verisight/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("verisight").join("config.toml"))
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Read a config file.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml(&content)
    }

    /// Read `path`, or the default location when `path` is `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path).await,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path).await,
                _ => {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }
}
