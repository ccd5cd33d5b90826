use std::path::Path;

use anyhow::{ensure, Result};
use walkdir::WalkDir;

use crate::session::UploadSession;
use crate::sniff::{self, RESULTS_JSON};
use crate::tracking::TrackingSink;

/// Per-walk file counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Visits every file under a results directory and uploads the ones with a
/// known format, one run per file.
pub struct BatchWalker<'a> {
    session: UploadSession<'a>,
}

impl<'a> BatchWalker<'a> {
    pub fn new(sink: &'a dyn TrackingSink, experiment_name: &'a str) -> Self {
        Self {
            session: UploadSession::new(sink, experiment_name),
        }
    }

    pub async fn walk(&self, root: &Path) -> Result<WalkSummary> {
        ensure!(
            root.is_dir(),
            "Results directory not found: {}",
            root.display()
        );
        tracing::info!("Uploading results under {}", root.display());

        let mut summary = WalkSummary::default();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let content = if entry.file_name() == RESULTS_JSON {
                match tokio::fs::read_to_string(path).await {
                    Ok(content) => Some(content),
                    Err(e) => {
                        tracing::warn!("Could not read {}: {}", path.display(), e);
                        None
                    }
                }
            } else {
                None
            };

            let Some(target) = sniff::target_for(path, content.as_deref()) else {
                summary.skipped += 1;
                continue;
            };

            match self.session.upload(&target).await {
                Ok(outcome) => {
                    tracing::info!(
                        "Uploaded {} metrics from {} as '{}'",
                        outcome.metrics_logged,
                        path.display(),
                        outcome.run_name
                    );
                    summary.uploaded += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to upload {} ({}): {}",
                        path.display(),
                        target.format,
                        e
                    );
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "Finished walk: {} uploaded, {} skipped, {} failed",
            summary.uploaded,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }
}
