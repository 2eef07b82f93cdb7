/*!
Detector-level data model: categories, findings and per-detector results
*/

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The four signal families the aggregator weighs.
///
/// Declaration order is priority order (highest first) and is what `Ord`
/// compares, so sorting by category sorts by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorCategory {
    AiGeneration,
    Manipulation,
    Artifact,
    Metadata,
}

impl DetectorCategory {
    /// Every category, in priority order.
    pub const ALL: [DetectorCategory; 4] = [
        DetectorCategory::AiGeneration,
        DetectorCategory::Manipulation,
        DetectorCategory::Artifact,
        DetectorCategory::Metadata,
    ];

    /// Weight before renormalization. The four sum to 1.0.
    pub fn base_weight(self) -> f64 {
        match self {
            DetectorCategory::AiGeneration => 0.35,
            DetectorCategory::Manipulation => 0.35,
            DetectorCategory::Artifact => 0.20,
            DetectorCategory::Metadata => 0.10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DetectorCategory::AiGeneration => "AI generation",
            DetectorCategory::Manipulation => "manipulation",
            DetectorCategory::Artifact => "artifact",
            DetectorCategory::Metadata => "metadata",
        }
    }

    /// Snake-case key, as used in finding kinds and JSON.
    pub fn key(self) -> &'static str {
        match self {
            DetectorCategory::AiGeneration => "ai_generation",
            DetectorCategory::Manipulation => "manipulation",
            DetectorCategory::Artifact => "artifact",
            DetectorCategory::Metadata => "metadata",
        }
    }
}

impl fmt::Display for DetectorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorStatus {
    Completed,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Confidence a finding of this severity contributes when findings are
    /// aggregated by severity.
    pub fn confidence(self) -> f64 {
        match self {
            Severity::Low => 0.3,
            Severity::Medium => 0.6,
            Severity::High => 0.9,
        }
    }

    pub fn from_confidence(confidence: f64) -> Self {
        match confidence {
            c if c >= 0.75 => Severity::High,
            c if c >= 0.45 => Severity::Medium,
            _ => Severity::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Pixel rectangle in normalized-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// A single observation made by one detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Region>,
    pub confidence: f64,
    pub description: String,
}

impl Finding {
    pub fn new(
        kind: impl Into<String>,
        severity: Severity,
        confidence: f64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            severity,
            location: None,
            confidence: clamp_unit(confidence),
            description: description.into(),
        }
    }

    pub fn at(mut self, region: Region) -> Self {
        self.location = Some(region);
        self
    }
}

/// Identity of a detector implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetectorInfo {
    pub id: &'static str,
    pub version: &'static str,
    pub category: DetectorCategory,
}

/// What one detector produced for one submission.
///
/// `confidence` is `None` ("unavailable") unless the detector completed.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorResult {
    pub info: DetectorInfo,
    pub status: DetectorStatus,
    pub confidence: Option<f64>,
    pub findings: Vec<Finding>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl DetectorResult {
    pub fn completed(info: DetectorInfo, confidence: f64, findings: Vec<Finding>) -> Self {
        Self {
            info,
            status: DetectorStatus::Completed,
            confidence: Some(confidence),
            findings,
            elapsed: Duration::ZERO,
            error: None,
        }
    }

    pub fn failed(info: DetectorInfo, reason: impl Into<String>) -> Self {
        Self {
            info,
            status: DetectorStatus::Failed,
            confidence: None,
            findings: Vec::new(),
            elapsed: Duration::ZERO,
            error: Some(reason.into()),
        }
    }

    pub fn timed_out(info: DetectorInfo, reason: impl Into<String>) -> Self {
        Self {
            status: DetectorStatus::TimedOut,
            ..Self::failed(info, reason)
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn category(&self) -> DetectorCategory {
        self.info.category
    }

    /// Completed with a confidence the aggregator can use.
    pub fn is_available(&self) -> bool {
        self.status == DetectorStatus::Completed && self.confidence.is_some()
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}
