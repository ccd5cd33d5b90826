use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use eval_upload::config::{BackendKind, ConfigOverrides, UploadConfig};
use eval_upload::{pipeline, tracking};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Consumes an evaluation results directory and uploads its metrics to an experiment tracker",
    long_about = None
)]
pub struct Cli {
    #[arg(
        long = "results_abs_dir",
        value_name = "PATH",
        help = "Absolute path to results file location"
    )]
    pub results_abs_dir: Option<PathBuf>,

    #[arg(
        long = "evaluation_id",
        value_name = "ID",
        help = "Evaluation ID for results to be drawn from (must be successful evaluation)"
    )]
    pub evaluation_id: Option<String>,

    #[arg(long = "mlflow_uri", value_name = "URI", help = "MLflow URI")]
    pub mlflow_uri: Option<String>,

    #[arg(long = "experiment_name", value_name = "NAME", help = "Experiment name")]
    pub experiment_name: Option<String>,

    #[arg(
        long,
        value_enum,
        default_value_t = Backend::Mlflow,
        help = "Tracking backend to upload to"
    )]
    pub backend: Backend,

    #[arg(
        long = "wandb_project",
        value_name = "PROJECT",
        help = "W&B project (falls back to WANDB_PROJECT)"
    )]
    pub wandb_project: Option<String>,

    #[arg(
        long = "wandb_entity",
        value_name = "ENTITY",
        help = "W&B entity (falls back to WANDB_ENTITY, then the API key's default entity)"
    )]
    pub wandb_entity: Option<String>,

    #[arg(
        long = "work_dir",
        value_name = "PATH",
        help = "Where downloaded results are unpacked (default: current directory)"
    )]
    pub work_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Mlflow,
    Wandb,
    /// Log what would be uploaded without contacting a tracker.
    DryRun,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Mlflow => BackendKind::Mlflow,
            Backend::Wandb => BackendKind::Wandb,
            Backend::DryRun => BackendKind::DryRun,
        }
    }
}

impl Cli {
    pub fn overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            results_abs_dir: self.results_abs_dir,
            evaluation_id: self.evaluation_id,
            mlflow_uri: self.mlflow_uri,
            experiment_name: self.experiment_name,
            backend: self.backend.into(),
            wandb_project: self.wandb_project,
            wandb_entity: self.wandb_entity,
            work_dir: self.work_dir,
        }
    }
}

/// Resolves configuration, connects to the tracker and uploads.
///
/// Only missing inputs and an unreachable tracker are errors; problems with
/// individual files or the download are logged by the pipeline.
pub async fn cli(args: Cli) -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Ignoring unreadable .env file: {}", e),
    }

    let config = UploadConfig::resolve(args.overrides())?;
    let sink = tracking::connect(&config.backend, &config.experiment_name)
        .await
        .context("Failed to connect to the tracking backend")?;

    let summary = pipeline::run(&config, sink.as_ref()).await;
    tracing::info!(
        "Upload complete: {} uploaded, {} skipped, {} failed",
        summary.uploaded,
        summary.skipped,
        summary.failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eval_upload::errors::ConfigError;
    use serial_test::serial;

    #[test]
    fn test_parses_underscored_flags() {
        let args = Cli::try_parse_from([
            "eval-upload",
            "--results_abs_dir",
            "/data/results",
            "--mlflow_uri",
            "http://mlflow:5000",
            "--experiment_name",
            "nightly",
        ])
        .unwrap();
        assert_eq!(args.results_abs_dir, Some(PathBuf::from("/data/results")));
        assert_eq!(args.backend, Backend::Mlflow);

        let overrides = args.overrides();
        assert_eq!(overrides.mlflow_uri.as_deref(), Some("http://mlflow:5000"));
        assert_eq!(overrides.experiment_name.as_deref(), Some("nightly"));
        assert_eq!(overrides.backend, BackendKind::Mlflow);
    }

    #[test]
    fn test_backend_values() {
        let args =
            Cli::try_parse_from(["eval-upload", "--evaluation_id", "e1", "--backend", "dry-run"])
                .unwrap();
        assert_eq!(args.backend, Backend::DryRun);
        assert!(Cli::try_parse_from(["eval-upload", "--backend", "tensorboard"]).is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_source_is_an_error() {
        let args = Cli::try_parse_from(["eval-upload", "--backend", "dry-run"]).unwrap();
        let err = temp_env::async_with_vars(
            [("MLFLOW_URI", None::<&str>)],
            cli(args),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::MissingSource)
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_dry_run_over_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("beir")).unwrap();
        std::fs::write(dir.path().join("beir/beir.json"), r#"{"ndcg": 0.5}"#).unwrap();

        let args = Cli::try_parse_from([
            "eval-upload",
            "--backend",
            "dry-run",
            "--results_abs_dir",
            dir.path().to_str().unwrap(),
        ])
        .unwrap();
        cli(args).await.unwrap();
    }
}
