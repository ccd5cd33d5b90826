use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing expected key '{key}'")]
    MissingKey { key: String },

    #[error("Expected {expected} at '{path}'")]
    UnexpectedShape { path: String, expected: &'static str },

    #[error("File is not a supported results format")]
    Unsupported,
}

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Tracking server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Artifact store '{uri}' is not reachable through the tracking server")]
    UnsupportedArtifactStore { uri: String },

    #[error("Failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<reqwest::Error> for TrackingError {
    fn from(error: reqwest::Error) -> Self {
        TrackingError::RequestFailed(error.to_string())
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Download request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to extract archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Extraction task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("At least one of --results_abs_dir or --evaluation_id must be provided.")]
    MissingSource,

    #[error("At least one of MLFLOW_URI or --mlflow_uri must be provided.")]
    MissingTrackingUri,

    #[error("At least one of WANDB_PROJECT or --wandb_project must be provided.")]
    MissingWandbProject,

    #[error("WANDB_API_KEY must be set to upload to Weights & Biases.")]
    MissingWandbApiKey,
}
