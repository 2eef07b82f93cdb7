/*!
Analysis of image files from disk
*/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use verisight_forensics::normalize;

use crate::engine::error::AnalyzeFileError;
use crate::engine::report::RiskReport;
use crate::engine::risk_engine::RiskEngine;

/// Outcome for one input file.
#[derive(Debug)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub outcome: Result<Arc<RiskReport>, AnalyzeFileError>,
}

/// Read, normalize and score one file.
pub async fn analyze_file(engine: &RiskEngine, path: &Path) -> Result<Arc<RiskReport>, AnalyzeFileError> {
    let raw = tokio::fs::read(path).await.map_err(|source| AnalyzeFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let options = engine.normalize_options();
    let image = tokio::task::spawn_blocking(move || normalize(&raw, &options))
        .await
        .map_err(|e| AnalyzeFileError::Worker {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .map_err(|source| AnalyzeFileError::Image {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(engine.analyze(Arc::new(image)).await?)
}

/// Analyze `paths` with at most `concurrency` files in flight. Outcomes
/// come back in input order.
pub fn analyze_files(
    engine: &RiskEngine,
    paths: Vec<PathBuf>,
    concurrency: usize,
) -> impl Stream<Item = FileAnalysis> + '_ {
    stream::iter(paths)
        .map(move |path| async move {
            let outcome = analyze_file(engine, &path).await;
            FileAnalysis { path, outcome }
        })
        .buffered(concurrency.max(1))
}
