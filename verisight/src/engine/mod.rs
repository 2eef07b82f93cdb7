/*!
Core modules of the detector orchestration, fusion and caching engine
*/

pub mod aggregator;
pub mod assembler;
pub mod batch;
pub mod cache;
pub mod config;
pub mod detectors;
pub mod error;
pub mod explain;
pub mod maintenance;
pub mod model;
pub mod orchestrator;
pub mod output_plugins;
pub mod report;
pub mod report_store;
pub mod risk_engine;
