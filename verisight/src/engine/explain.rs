/*!
Human-readable explanations built from detector findings
*/

use std::cmp::Ordering;

use crate::engine::aggregator::ScoreBreakdown;
use crate::engine::config::ExplainConfig;
use crate::engine::model::{DetectorCategory, DetectorResult, Finding, Severity};
use crate::engine::report::{Explanation, ReportFinding, RiskCategory};

/// Shapes findings and a score breakdown into an [`Explanation`].
#[derive(Debug, Clone)]
pub struct ExplainabilityComposer {
    min_confidence: f64,
    max_details: usize,
}

impl Default for ExplainabilityComposer {
    fn default() -> Self {
        Self::from_config(&ExplainConfig::default())
    }
}

impl ExplainabilityComposer {
    pub fn from_config(config: &ExplainConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            max_details: config.max_details.max(1),
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn explain(
        &self,
        results: &[DetectorResult],
        findings: &[ReportFinding],
        breakdown: &ScoreBreakdown,
    ) -> Explanation {
        let mut ranked: Vec<&ReportFinding> = findings.iter().collect();
        ranked.sort_by(|a, b| rank(a, b));

        let mut details: Vec<String> = ranked
            .iter()
            .filter(|f| f.finding.confidence >= self.min_confidence)
            .take(self.max_details)
            .map(|f| detail_line(f))
            .collect();
        // A non-zero score always comes with at least its strongest finding.
        if details.is_empty() && breakdown.score > 0 {
            details.extend(ranked.first().map(|f| detail_line(f)));
        }

        let unavailable: Vec<&str> = results
            .iter()
            .filter(|r| !r.is_available())
            .map(|r| r.info.id)
            .collect();
        let dominant = breakdown.dominant();

        let mut summary = match dominant {
            Some(category) => format!(
                "{} risk ({}/100), driven mainly by {}.",
                capitalized(breakdown.category),
                breakdown.score,
                signal_phrase(category)
            ),
            None => format!(
                "Low risk ({}/100): no detector found signs of generation or tampering.",
                breakdown.score
            ),
        };
        if !unavailable.is_empty() {
            summary.push_str(&format!(
                " Reduced confidence: {} of {} detectors produced no signal ({}).",
                unavailable.len(),
                results.len(),
                unavailable.join(", ")
            ));
        }

        Explanation {
            summary,
            details,
            recommendation: recommendation(breakdown.category).to_string(),
            dominant_category: dominant,
            reduced_confidence: !unavailable.is_empty(),
        }
    }
}

/// Findings from available detectors, in result order.
///
/// A detector that reports a non-zero confidence without any finding gets a
/// synthesized `<category>_signal` finding so the score is always backed by
/// at least one entry.
pub fn collect_findings(results: &[DetectorResult]) -> Vec<ReportFinding> {
    let mut collected = Vec::new();
    for result in results.iter().filter(|r| r.is_available()) {
        let category = result.category();
        let detector = result.info.id.to_string();

        if result.findings.is_empty() {
            if let Some(confidence) = result.confidence.filter(|c| *c > 0.0) {
                collected.push(ReportFinding {
                    detector,
                    category,
                    finding: Finding::new(
                        format!("{}_signal", category.key()),
                        Severity::from_confidence(confidence),
                        confidence,
                        format!("{} detector reported confidence {confidence:.2}", category.label()),
                    ),
                });
            }
            continue;
        }

        collected.extend(result.findings.iter().map(|finding| ReportFinding {
            detector: detector.clone(),
            category,
            finding: finding.clone(),
        }));
    }
    collected
}

/// Descending confidence, then category priority, detector and kind.
fn rank(a: &ReportFinding, b: &ReportFinding) -> Ordering {
    b.finding
        .confidence
        .total_cmp(&a.finding.confidence)
        .then(a.category.cmp(&b.category))
        .then_with(|| a.detector.cmp(&b.detector))
        .then_with(|| a.finding.kind.cmp(&b.finding.kind))
}

fn detail_line(finding: &ReportFinding) -> String {
    let mut line = format!(
        "[{}] {} ({} severity, confidence {:.2})",
        finding.category.label(),
        finding.finding.description,
        finding.finding.severity.as_str(),
        finding.finding.confidence
    );
    if let Some(region) = finding.finding.location {
        line.push_str(&format!(" at {region}"));
    }
    line
}

fn signal_phrase(category: DetectorCategory) -> &'static str {
    match category {
        DetectorCategory::AiGeneration => "traits typical of AI-generated imagery",
        DetectorCategory::Manipulation => "regions that appear to have been edited",
        DetectorCategory::Artifact => "compression and processing artifacts",
        DetectorCategory::Metadata => "suspicious file metadata",
    }
}

fn capitalized(category: RiskCategory) -> &'static str {
    match category {
        RiskCategory::Low => "Low",
        RiskCategory::Medium => "Medium",
        RiskCategory::High => "High",
    }
}

pub fn recommendation(category: RiskCategory) -> &'static str {
    match category {
        RiskCategory::Low => "No action needed; the image can be treated as authentic.",
        RiskCategory::Medium => "Review the image manually before relying on it.",
        RiskCategory::High => "Treat the image as untrusted and escalate for expert review.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aggregator::RiskAggregator;
    use crate::engine::model::DetectorInfo;

    fn info(category: DetectorCategory) -> DetectorInfo {
        DetectorInfo {
            id: category.key(),
            version: "1",
            category,
        }
    }

    fn explain(results: &[DetectorResult]) -> Explanation {
        let findings = collect_findings(results);
        let breakdown = RiskAggregator.score(results);
        ExplainabilityComposer::default().explain(results, &findings, &breakdown)
    }

    #[test]
    fn details_are_ranked_by_confidence_then_priority() {
        let results = vec![
            DetectorResult::completed(
                info(DetectorCategory::AiGeneration),
                0.8,
                vec![
                    Finding::new("smooth", Severity::High, 0.8, "smooth"),
                    Finding::new("faint", Severity::Low, 0.2, "faint"),
                ],
            ),
            DetectorResult::completed(
                info(DetectorCategory::Metadata),
                0.2,
                vec![Finding::new("generator", Severity::High, 0.9, "generator")],
            ),
            DetectorResult::completed(
                info(DetectorCategory::Manipulation),
                0.8,
                vec![Finding::new("splice", Severity::High, 0.8, "splice")],
            ),
        ];
        let explanation = explain(&results);

        assert_eq!(explanation.details.len(), 3);
        assert!(explanation.details[0].starts_with("[metadata] generator"));
        assert!(explanation.details[1].starts_with("[AI generation] smooth"));
        assert!(explanation.details[2].starts_with("[manipulation] splice"));
        assert!(!explanation.reduced_confidence);
    }

    #[test]
    fn details_are_capped() {
        let findings = (0..25)
            .map(|i| Finding::new(format!("f{i:02}"), Severity::High, 0.9, "x"))
            .collect();
        let results = vec![DetectorResult::completed(
            info(DetectorCategory::Manipulation),
            0.9,
            findings,
        )];
        assert_eq!(explain(&results).details.len(), 10);
    }

    #[test]
    fn unavailable_detectors_are_called_out() {
        let results = vec![
            DetectorResult::completed(info(DetectorCategory::AiGeneration), 0.9, vec![]),
            DetectorResult::timed_out(info(DetectorCategory::Artifact), "deadline"),
        ];
        let explanation = explain(&results);
        assert!(explanation.reduced_confidence);
        assert!(explanation.summary.contains("Reduced confidence: 1 of 2"));
        assert!(explanation.summary.contains("artifact"));
        assert_eq!(explanation.dominant_category, Some(DetectorCategory::AiGeneration));
    }

    #[test]
    fn positive_score_always_has_a_detail() {
        // Every finding is below the detail threshold.
        let results = vec![DetectorResult::completed(
            info(DetectorCategory::Manipulation),
            0.3,
            vec![Finding::new("weak", Severity::Low, 0.3, "weak")],
        )];
        let explanation = explain(&results);
        assert_eq!(explanation.details.len(), 1);
        assert!(!explanation.summary.is_empty());
        assert_eq!(explanation.recommendation, recommendation(RiskCategory::Low));
    }

    #[test]
    fn bare_confidence_gets_a_synthesized_finding() {
        let results = vec![
            DetectorResult::completed(info(DetectorCategory::AiGeneration), 0.9, vec![]),
            DetectorResult::completed(info(DetectorCategory::Metadata), 0.0, vec![]),
        ];
        let findings = collect_findings(&results);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].finding.kind, "ai_generation_signal");
        assert_eq!(findings[0].finding.severity, Severity::High);
    }

    #[test]
    fn clean_result_explains_low_risk() {
        let results = vec![DetectorResult::completed(info(DetectorCategory::Artifact), 0.0, vec![])];
        let explanation = explain(&results);
        assert!(explanation.details.is_empty());
        assert!(explanation.summary.starts_with("Low risk (0/100)"));
        assert_eq!(explanation.dominant_category, None);
    }
}
