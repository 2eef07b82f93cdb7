/*!
Final report assembly
*/

use std::time::Duration;

use chrono::Utc;
use verisight_forensics::ImageFingerprint;

use crate::engine::aggregator::ScoreBreakdown;
use crate::engine::model::DetectorResult;
use crate::engine::report::{Explanation, ReportFinding, RiskReport};

/// Combines the pipeline outputs into an immutable [`RiskReport`]. No I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportAssembler;

impl ReportAssembler {
    pub fn assemble(
        &self,
        fingerprint: ImageFingerprint,
        results: &[DetectorResult],
        breakdown: ScoreBreakdown,
        findings: Vec<ReportFinding>,
        explanation: Explanation,
        elapsed: Duration,
    ) -> RiskReport {
        RiskReport {
            fingerprint,
            score: breakdown.score,
            category: breakdown.category,
            summaries: breakdown.summaries,
            findings,
            explanation,
            complete: !results.is_empty() && results.iter().all(DetectorResult::is_available),
            processing_ms: elapsed.as_millis() as u64,
            created_at: Utc::now(),
        }
    }
}
