use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{RunHandle, RunStatus, TrackingSink};
use crate::errors::TrackingError;
use crate::metric::MetricSample;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    StartRun {
        run_id: String,
        name: String,
    },
    LogMetric {
        run_id: String,
        metric: MetricSample,
    },
    LogArtifact {
        run_id: String,
        path: PathBuf,
        artifact_dir: Option<String>,
    },
    LogParams {
        run_id: String,
        params: BTreeMap<String, String>,
    },
    EndRun {
        run_id: String,
        status: RunStatus,
    },
}

/// Keeps every call in memory. Backs the `dry-run` backend.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    next_id: AtomicUsize,
    log_calls: bool,
    reject_metric: Option<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also report each call through `tracing`.
    pub fn with_logging(mut self) -> Self {
        self.log_calls = true;
        self
    }

    /// Makes `log_metric` fail for the metric called `name`.
    pub fn rejecting_metric(mut self, name: impl Into<String>) -> Self {
        self.reject_metric = Some(name.into());
        self
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Names of every run started, in order.
    pub fn run_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::StartRun { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn metrics_for(&self, run_id: &str) -> Vec<MetricSample> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::LogMetric { run_id: id, metric } if id == run_id => Some(metric),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SinkCall) {
        if self.log_calls {
            tracing::info!("{:?}", call);
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl TrackingSink for RecordingSink {
    async fn start_run(&self, run_name: &str) -> Result<RunHandle, TrackingError> {
        let id = format!("run-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.record(SinkCall::StartRun {
            run_id: id.clone(),
            name: run_name.to_string(),
        });
        Ok(RunHandle::new(id, run_name))
    }

    async fn log_metric(
        &self,
        run: &RunHandle,
        metric: &MetricSample,
    ) -> Result<(), TrackingError> {
        if self.reject_metric.as_deref() == Some(metric.name.as_str()) {
            return Err(TrackingError::Api {
                status: 400,
                message: format!("rejected metric {}", metric.name),
            });
        }
        self.record(SinkCall::LogMetric {
            run_id: run.id().to_string(),
            metric: metric.clone(),
        });
        Ok(())
    }

    async fn log_artifact(
        &self,
        run: &RunHandle,
        path: &Path,
        artifact_dir: Option<&str>,
    ) -> Result<(), TrackingError> {
        self.record(SinkCall::LogArtifact {
            run_id: run.id().to_string(),
            path: path.to_path_buf(),
            artifact_dir: artifact_dir.map(str::to_string),
        });
        Ok(())
    }

    async fn log_params(
        &self,
        run: &RunHandle,
        params: &BTreeMap<String, String>,
    ) -> Result<(), TrackingError> {
        self.record(SinkCall::LogParams {
            run_id: run.id().to_string(),
            params: params.clone(),
        });
        Ok(())
    }

    async fn end_run(&self, run: RunHandle, status: RunStatus) -> Result<(), TrackingError> {
        self.record(SinkCall::EndRun {
            run_id: run.id().to_string(),
            status,
        });
        Ok(())
    }
}
