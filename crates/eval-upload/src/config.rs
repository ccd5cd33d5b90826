//! Immutable run configuration assembled once from flags and environment.
//!
//! Environment values for `MLFLOW_URI` and `EXPERIMENT_NAME` take precedence
//! over the matching flags, as deployments set them centrally.

use std::path::PathBuf;

use crate::errors::ConfigError;

pub const DEFAULT_EXPERIMENT_NAME: &str = "Nemo Evaluator MS Testing";
pub const DEFAULT_EVAL_MS_URL: &str = "https://evaluation.stg.llm.ngc.nvidia.com/v1";
pub const DEFAULT_WANDB_BASE_URL: &str = "https://api.wandb.ai";

pub const MLFLOW_URI_ENV: &str = "MLFLOW_URI";
pub const EXPERIMENT_NAME_ENV: &str = "EXPERIMENT_NAME";
pub const EVAL_MS_URL_ENV: &str = "EVAL_MS_URL";
pub const MLFLOW_TOKEN_ENV: &str = "MLFLOW_TRACKING_TOKEN";
pub const MLFLOW_INSECURE_TLS_ENV: &str = "MLFLOW_TRACKING_INSECURE_TLS";
pub const WANDB_API_KEY_ENV: &str = "WANDB_API_KEY";
pub const WANDB_BASE_URL_ENV: &str = "WANDB_BASE_URL";
pub const WANDB_ENTITY_ENV: &str = "WANDB_ENTITY";
pub const WANDB_PROJECT_ENV: &str = "WANDB_PROJECT";

/// Where the results to upload come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultsSource {
    Directory(PathBuf),
    /// Downloaded from the evaluation service by id.
    Evaluation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Mlflow,
    Wandb,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Mlflow {
        tracking_uri: String,
        token: Option<String>,
        insecure_tls: bool,
    },
    Wandb {
        base_url: String,
        api_key: String,
        entity: Option<String>,
        project: String,
    },
    DryRun,
}

/// Values supplied on the command line; all optional.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub results_abs_dir: Option<PathBuf>,
    pub evaluation_id: Option<String>,
    pub mlflow_uri: Option<String>,
    pub experiment_name: Option<String>,
    pub backend: BackendKind,
    pub wandb_project: Option<String>,
    pub wandb_entity: Option<String>,
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub source: ResultsSource,
    pub experiment_name: String,
    pub eval_ms_url: String,
    pub backend: BackendConfig,
    pub work_dir: PathBuf,
}

impl UploadConfig {
    /// Resolves against the process environment.
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolves against `env`, which returns the value of an environment key.
    pub fn resolve_with<F>(overrides: ConfigOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|value| !value.is_empty());

        let source = match (overrides.evaluation_id, overrides.results_abs_dir) {
            (Some(id), _) => ResultsSource::Evaluation(id),
            (None, Some(dir)) => ResultsSource::Directory(dir),
            (None, None) => return Err(ConfigError::MissingSource),
        };

        let backend = match overrides.backend {
            BackendKind::Mlflow => BackendConfig::Mlflow {
                tracking_uri: env(MLFLOW_URI_ENV)
                    .or(overrides.mlflow_uri)
                    .ok_or(ConfigError::MissingTrackingUri)?,
                token: env(MLFLOW_TOKEN_ENV),
                insecure_tls: env(MLFLOW_INSECURE_TLS_ENV)
                    .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                    .unwrap_or(false),
            },
            BackendKind::Wandb => BackendConfig::Wandb {
                base_url: env(WANDB_BASE_URL_ENV)
                    .unwrap_or_else(|| DEFAULT_WANDB_BASE_URL.to_string()),
                api_key: env(WANDB_API_KEY_ENV).ok_or(ConfigError::MissingWandbApiKey)?,
                entity: overrides.wandb_entity.or_else(|| env(WANDB_ENTITY_ENV)),
                project: overrides
                    .wandb_project
                    .or_else(|| env(WANDB_PROJECT_ENV))
                    .ok_or(ConfigError::MissingWandbProject)?,
            },
            BackendKind::DryRun => BackendConfig::DryRun,
        };

        Ok(Self {
            source,
            experiment_name: env(EXPERIMENT_NAME_ENV)
                .or(overrides.experiment_name)
                .unwrap_or_else(|| DEFAULT_EXPERIMENT_NAME.to_string()),
            eval_ms_url: env(EVAL_MS_URL_ENV).unwrap_or_else(|| DEFAULT_EVAL_MS_URL.to_string()),
            backend,
            work_dir: overrides.work_dir.unwrap_or_else(|| PathBuf::from(".")),
        })
    }
}
