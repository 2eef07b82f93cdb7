/*!
The final risk report and the detail-level views derived from it
*/

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use verisight_forensics::ImageFingerprint;

use crate::engine::model::{DetectorCategory, DetectorStatus, Finding};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl RiskCategory {
    /// Low 0-30, Medium 31-70, High 71-100.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=30 => RiskCategory::Low,
            31..=70 => RiskCategory::Medium,
            _ => RiskCategory::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskCategory::Low => "low",
            RiskCategory::Medium => "medium",
            RiskCategory::High => "high",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one detector fared, without its raw findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorOutcome {
    pub detector: String,
    pub version: String,
    pub status: DetectorStatus,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-category view of the fusion step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: DetectorCategory,
    pub available: bool,
    /// Fused category signal in `[0, 1]`, `None` when unavailable.
    pub confidence: Option<f64>,
    pub base_weight: f64,
    /// Weight after renormalization over the available categories.
    pub effective_weight: f64,
    /// Points this category added to the score (`effective_weight * confidence * 100`).
    pub contribution: f64,
    pub finding_count: usize,
    pub detectors: Vec<DetectorOutcome>,
}

/// A finding together with the detector that made it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFinding {
    pub detector: String,
    pub category: DetectorCategory,
    #[serde(flatten)]
    pub finding: Finding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub summary: String,
    pub details: Vec<String>,
    pub recommendation: String,
    /// Category with the largest weighted contribution, if any contributed.
    pub dominant_category: Option<DetectorCategory>,
    /// Set when at least one detector produced no signal.
    pub reduced_confidence: bool,
}

/// Final, immutable result for one fingerprint.
///
/// Shared read-only behind an `Arc` once cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub fingerprint: ImageFingerprint,
    pub score: u8,
    pub category: RiskCategory,
    pub summaries: Vec<CategorySummary>,
    pub findings: Vec<ReportFinding>,
    pub explanation: Explanation,
    /// True only if every detector completed.
    pub complete: bool,
    pub processing_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Flags from the calling API controlling how much detail a response
/// carries. They never change the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub detailed_report: bool,
    pub metadata_analysis: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            detailed_report: false,
            metadata_analysis: true,
        }
    }
}

/// Borrowed projection of a [`RiskReport`] at a given detail level.
#[derive(Debug, Clone, Serialize)]
pub struct ReportView<'a> {
    pub fingerprint: &'a ImageFingerprint,
    pub score: u8,
    pub category: RiskCategory,
    pub complete: bool,
    pub explanation: &'a Explanation,
    pub summaries: Vec<&'a CategorySummary>,
    pub findings: Vec<&'a ReportFinding>,
    pub processing_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl RiskReport {
    /// Derive the view requested by `options`.
    ///
    /// Without `detailed_report` only findings at or above
    /// `min_confidence` are listed; without `metadata_analysis` metadata
    /// findings and the metadata summary are left out.
    pub fn view(&self, options: &AnalysisOptions, min_confidence: f64) -> ReportView<'_> {
        let include = |category: DetectorCategory| {
            options.metadata_analysis || category != DetectorCategory::Metadata
        };

        ReportView {
            fingerprint: &self.fingerprint,
            score: self.score,
            category: self.category,
            complete: self.complete,
            explanation: &self.explanation,
            summaries: self.summaries.iter().filter(|s| include(s.category)).collect(),
            findings: self
                .findings
                .iter()
                .filter(|f| include(f.category))
                .filter(|f| options.detailed_report || f.finding.confidence >= min_confidence)
                .collect(),
            processing_ms: self.processing_ms,
            created_at: self.created_at,
        }
    }

    pub fn summary_for(&self, category: DetectorCategory) -> Option<&CategorySummary> {
        self.summaries.iter().find(|s| s.category == category)
    }
}
