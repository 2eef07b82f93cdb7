/*!
Fusion of detector confidences into one bounded, categorized score
*/

use std::collections::BTreeMap;

use crate::engine::model::{DetectorCategory, DetectorResult, Finding};
use crate::engine::report::{CategorySummary, DetectorOutcome, RiskCategory};

/// Flag count at which metadata suspicion saturates.
pub const METADATA_SATURATION: usize = 5;

/// Metadata suspicion: flag count normalized by the saturation cap.
pub fn metadata_suspicion(flags: usize) -> f64 {
    flags.min(METADATA_SATURATION) as f64 / METADATA_SATURATION as f64
}

/// Highest severity-to-confidence mapping over `findings`.
pub fn max_severity_confidence(findings: &[Finding]) -> Option<f64> {
    findings
        .iter()
        .map(|finding| finding.severity.confidence())
        .max_by(f64::total_cmp)
}

/// Base weights renormalized over the available categories.
///
/// The divisor is summed in priority order so the same available set
/// always produces the same bits.
pub fn effective_weights<I>(available: I) -> BTreeMap<DetectorCategory, f64>
where
    I: IntoIterator<Item = DetectorCategory>,
{
    let mut weights: BTreeMap<DetectorCategory, f64> = available
        .into_iter()
        .map(|category| (category, category.base_weight()))
        .collect();
    let total: f64 = weights.values().sum();
    if total > 0.0 {
        for weight in weights.values_mut() {
            *weight /= total;
        }
    }
    weights
}

/// `floor(x + 0.5)`, clamped to the score range.
pub fn round_half_up(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value + 0.5).floor().clamp(0.0, 100.0) as u8
}

/// Output of one aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub score: u8,
    pub category: RiskCategory,
    /// Weighted sum in `[0, 1]` before scaling and rounding.
    pub weighted_sum: f64,
    /// One entry per category, in priority order.
    pub summaries: Vec<CategorySummary>,
}

impl ScoreBreakdown {
    /// Category with the largest contribution; ties go to the higher
    /// priority category. `None` when nothing contributed.
    pub fn dominant(&self) -> Option<DetectorCategory> {
        let mut best: Option<&CategorySummary> = None;
        for summary in self.summaries.iter().filter(|s| s.contribution > 0.0) {
            if best.is_none_or(|b| summary.contribution > b.contribution) {
                best = Some(summary);
            }
        }
        best.map(|summary| summary.category)
    }

    /// Sum of effective weights over available categories.
    pub fn weight_total(&self) -> f64 {
        self.summaries.iter().map(|s| s.effective_weight).sum()
    }
}

/// Stateless fusion step.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskAggregator;

impl RiskAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Fuse a result set into a score. Pure: the same results always give
    /// the same breakdown.
    pub fn score(&self, results: &[DetectorResult]) -> ScoreBreakdown {
        let signals: BTreeMap<DetectorCategory, f64> = DetectorCategory::ALL
            .iter()
            .filter_map(|category| category_signal(*category, results).map(|s| (*category, s)))
            .collect();
        let weights = effective_weights(signals.keys().copied());

        let mut weighted_sum = 0.0;
        let mut summaries = Vec::with_capacity(DetectorCategory::ALL.len());
        for category in DetectorCategory::ALL {
            let members: Vec<&DetectorResult> = results.iter().filter(|r| r.category() == category).collect();
            let confidence = signals.get(&category).copied();
            let effective_weight = weights.get(&category).copied().unwrap_or(0.0);
            let weighted = effective_weight * confidence.unwrap_or(0.0);
            weighted_sum += weighted;

            summaries.push(CategorySummary {
                category,
                available: confidence.is_some(),
                confidence,
                base_weight: category.base_weight(),
                effective_weight,
                contribution: weighted * 100.0,
                finding_count: members
                    .iter()
                    .filter(|r| r.is_available())
                    .map(|r| r.findings.len())
                    .sum(),
                detectors: members.iter().map(|r| outcome(r)).collect(),
            });
        }

        let weighted_sum = weighted_sum.clamp(0.0, 1.0);
        let score = round_half_up(weighted_sum * 100.0);
        ScoreBreakdown {
            score,
            category: RiskCategory::from_score(score),
            weighted_sum,
            summaries,
        }
    }
}

/// Signal for one category: the maximum over its available detectors.
///
/// Artifact detectors are read through their finding severities; the other
/// categories use the reported confidence.
fn category_signal(category: DetectorCategory, results: &[DetectorResult]) -> Option<f64> {
    results
        .iter()
        .filter(|r| r.category() == category && r.is_available())
        .filter_map(|r| match category {
            DetectorCategory::Artifact => max_severity_confidence(&r.findings).or(r.confidence),
            _ => r.confidence,
        })
        .max_by(f64::total_cmp)
}

fn outcome(result: &DetectorResult) -> DetectorOutcome {
    DetectorOutcome {
        detector: result.info.id.to_string(),
        version: result.info.version.to_string(),
        status: result.status,
        elapsed_ms: result.elapsed.as_millis() as u64,
        error: result.error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{DetectorInfo, Severity};

    fn info(category: DetectorCategory) -> DetectorInfo {
        DetectorInfo {
            id: category.key(),
            version: "1",
            category,
        }
    }

    fn completed(category: DetectorCategory, confidence: f64) -> DetectorResult {
        DetectorResult::completed(info(category), confidence, vec![])
    }

    fn scenario() -> Vec<DetectorResult> {
        vec![
            completed(DetectorCategory::AiGeneration, 0.9),
            completed(DetectorCategory::Manipulation, 0.1),
            DetectorResult::timed_out(info(DetectorCategory::Artifact), "deadline"),
            completed(DetectorCategory::Metadata, 0.05),
        ]
    }

    #[test]
    fn partial_result_set_is_renormalized() {
        let breakdown = RiskAggregator.score(&scenario());

        let weight = |c| breakdown.summaries.iter().find(|s| s.category == c).unwrap().effective_weight;
        assert!((weight(DetectorCategory::AiGeneration) - 0.4375).abs() < 1e-12);
        assert!((weight(DetectorCategory::Manipulation) - 0.4375).abs() < 1e-12);
        assert!((weight(DetectorCategory::Metadata) - 0.125).abs() < 1e-12);
        assert_eq!(weight(DetectorCategory::Artifact), 0.0);

        assert!((breakdown.weighted_sum - 0.44375).abs() < 1e-12);
        assert_eq!(breakdown.score, 44);
        assert_eq!(breakdown.category, RiskCategory::Medium);
        assert_eq!(breakdown.dominant(), Some(DetectorCategory::AiGeneration));
    }

    #[test]
    fn effective_weights_sum_to_one_for_every_subset() {
        for mask in 1u8..16 {
            let subset: Vec<_> = DetectorCategory::ALL
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, c)| *c)
                .collect();
            let weights = effective_weights(subset.clone());
            let total: f64 = weights.values().sum();
            assert!((total - 1.0).abs() < 1e-12, "subset {subset:?} sums to {total}");
            assert_eq!(weights.len(), subset.len());
        }
    }

    #[test]
    fn scoring_is_idempotent() {
        let results = scenario();
        let first = RiskAggregator.score(&results);
        let second = RiskAggregator.score(&results);
        assert_eq!(first, second);
        assert_eq!(first.weighted_sum.to_bits(), second.weighted_sum.to_bits());
    }

    #[test]
    fn score_stays_in_range() {
        for step in 0..=20 {
            let confidence = step as f64 / 20.0;
            let results: Vec<_> = DetectorCategory::ALL
                .iter()
                .map(|c| completed(*c, confidence))
                .collect();
            let breakdown = RiskAggregator.score(&results);
            assert!(breakdown.score <= 100);
            assert!((breakdown.weight_total() - 1.0).abs() < 1e-12);
        }
        let all_max: Vec<_> = DetectorCategory::ALL.iter().map(|c| completed(*c, 1.0)).collect();
        assert_eq!(RiskAggregator.score(&all_max).score, 100);
    }

    #[test]
    fn artifact_signal_uses_finding_severity() {
        let findings = vec![
            Finding::new("a", Severity::Low, 0.2, "low"),
            Finding::new("b", Severity::Medium, 0.1, "medium"),
        ];
        let results = vec![DetectorResult::completed(
            info(DetectorCategory::Artifact),
            0.05,
            findings,
        )];
        let breakdown = RiskAggregator.score(&results);
        let artifact = &breakdown.summaries[2];
        assert_eq!(artifact.confidence, Some(0.6));
        assert_eq!(artifact.finding_count, 2);
        assert_eq!(breakdown.score, 60);
    }

    #[test]
    fn strongest_detector_wins_within_a_category() {
        let results = vec![
            completed(DetectorCategory::Manipulation, 0.2),
            completed(DetectorCategory::Manipulation, 0.7),
            DetectorResult::failed(info(DetectorCategory::Manipulation), "boom"),
        ];
        let breakdown = RiskAggregator.score(&results);
        assert_eq!(breakdown.summaries[1].confidence, Some(0.7));
        assert_eq!(breakdown.summaries[1].detectors.len(), 3);
        assert_eq!(breakdown.score, 70);
    }

    #[test]
    fn nothing_available_scores_zero() {
        let results = vec![DetectorResult::failed(info(DetectorCategory::Metadata), "boom")];
        let breakdown = RiskAggregator.score(&results);
        assert_eq!(breakdown.score, 0);
        assert_eq!(breakdown.dominant(), None);
        assert!(breakdown.summaries.iter().all(|s| !s.available));
    }

    #[test]
    fn metadata_suspicion_saturates() {
        assert_eq!(metadata_suspicion(0), 0.0);
        assert!((metadata_suspicion(2) - 0.4).abs() < 1e-12);
        assert_eq!(metadata_suspicion(5), 1.0);
        assert_eq!(metadata_suspicion(9), 1.0);
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_half_up(44.375), 44);
        assert_eq!(round_half_up(44.5), 45);
        assert_eq!(round_half_up(-3.0), 0);
        assert_eq!(round_half_up(150.0), 100);
    }
}
