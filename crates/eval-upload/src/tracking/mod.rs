//! Experiment-tracking backends that receive the extracted metrics.

pub mod mlflow;
pub mod recording;
pub mod wandb;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::errors::TrackingError;
use crate::metric::MetricSample;

pub use mlflow::MlflowSink;
pub use recording::{RecordingSink, SinkCall};
pub use wandb::WandbSink;

/// An open run at the backend. Closing it consumes the handle.
#[derive(Debug, PartialEq, Eq)]
pub struct RunHandle {
    id: String,
    name: String,
    artifact_uri: Option<String>,
}

impl RunHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            artifact_uri: None,
        }
    }

    /// Root the backend reported for this run's artifacts.
    pub fn with_artifact_uri(mut self, uri: impl Into<String>) -> Self {
        self.artifact_uri = Some(uri.into());
        self
    }

    pub fn artifact_uri(&self) -> Option<&str> {
        self.artifact_uri.as_deref()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Finished,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Finished => write!(f, "FINISHED"),
            RunStatus::Failed => write!(f, "FAILED"),
        }
    }
}

#[async_trait]
pub trait TrackingSink: Send + Sync {
    /// Opens a run named `run_name` under the sink's experiment.
    async fn start_run(&self, run_name: &str) -> Result<RunHandle, TrackingError>;

    async fn log_metric(&self, run: &RunHandle, metric: &MetricSample)
        -> Result<(), TrackingError>;

    /// Attaches the file at `path`, optionally below `artifact_dir`.
    async fn log_artifact(
        &self,
        run: &RunHandle,
        path: &Path,
        artifact_dir: Option<&str>,
    ) -> Result<(), TrackingError>;

    async fn log_params(
        &self,
        run: &RunHandle,
        params: &BTreeMap<String, String>,
    ) -> Result<(), TrackingError>;

    async fn end_run(&self, run: RunHandle, status: RunStatus) -> Result<(), TrackingError>;
}

/// Connects to the backend selected in the configuration.
pub async fn connect(
    backend: &BackendConfig,
    experiment_name: &str,
) -> Result<Box<dyn TrackingSink>, TrackingError> {
    match backend {
        BackendConfig::Mlflow {
            tracking_uri,
            token,
            insecure_tls,
        } => {
            let sink =
                MlflowSink::connect(tracking_uri, token.clone(), *insecure_tls, experiment_name)
                    .await?;
            Ok(Box::new(sink))
        }
        BackendConfig::Wandb {
            base_url,
            api_key,
            entity,
            project,
        } => {
            let sink = WandbSink::connect(
                base_url,
                api_key.clone(),
                entity.clone(),
                project.clone(),
                experiment_name,
            )
            .await?;
            Ok(Box::new(sink))
        }
        BackendConfig::DryRun => Ok(Box::new(RecordingSink::new().with_logging())),
    }
}

pub(crate) fn file_name_of(path: &Path) -> Result<String, TrackingError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| TrackingError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
        })
}

pub(crate) async fn read_artifact(path: &Path) -> Result<Vec<u8>, TrackingError> {
    tokio::fs::read(path).await.map_err(|source| TrackingError::Io {
        path: path.to_path_buf(),
        source,
    })
}
