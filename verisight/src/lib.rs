/*!
Verisight: explainable risk scoring for submitted images.

A submission is fingerprinted, looked up in the [`ResultCache`], and on a
miss fanned out to every registered detector by the
[`DetectorOrchestrator`]. Detector results are fused by the
[`RiskAggregator`], explained by the [`ExplainabilityComposer`] and
assembled into an immutable [`RiskReport`]. [`RiskEngine`] wires these
together and owns the cache lifecycle.

[`ResultCache`]: engine::cache::ResultCache
[`DetectorOrchestrator`]: engine::orchestrator::DetectorOrchestrator
[`RiskAggregator`]: engine::aggregator::RiskAggregator
[`ExplainabilityComposer`]: engine::explain::ExplainabilityComposer
[`RiskReport`]: engine::report::RiskReport
[`RiskEngine`]: engine::risk_engine::RiskEngine
*/

pub mod engine;

pub use crate::engine::{
    config::EngineConfig,
    error::EngineError,
    report::{AnalysisOptions, RiskCategory, RiskReport},
    risk_engine::RiskEngine,
};
pub use verisight_forensics::{ImageFingerprint, NormalizedImage};
