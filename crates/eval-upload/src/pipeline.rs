//! Top-level orchestration: resolve the results directory, walk it, clean up.

use crate::archive::ArchiveFetcher;
use crate::config::{ResultsSource, UploadConfig};
use crate::tracking::TrackingSink;
use crate::walker::{BatchWalker, WalkSummary};

/// Uploads every recognised results file described by `config`.
///
/// Failures are logged rather than returned. When results were downloaded,
/// the archive and its extraction are removed before this returns, whatever
/// happened during the walk.
pub async fn run(config: &UploadConfig, sink: &dyn TrackingSink) -> WalkSummary {
    let walker = BatchWalker::new(sink, &config.experiment_name);

    match &config.source {
        ResultsSource::Directory(dir) => walker.walk(dir).await.unwrap_or_else(|e| {
            tracing::error!("An unexpected error happened: {:#}", e);
            WalkSummary::default()
        }),
        ResultsSource::Evaluation(evaluation_id) => {
            let fetcher = match ArchiveFetcher::new(&config.eval_ms_url, &config.work_dir) {
                Ok(fetcher) => fetcher,
                Err(e) => {
                    tracing::error!("Could not prepare results download: {}", e);
                    return WalkSummary::default();
                }
            };
            let _workspace = fetcher.workspace();

            let Some(results_dir) = fetcher.fetch(evaluation_id).await else {
                tracing::error!("No results found for evaluation {}", evaluation_id);
                return WalkSummary::default();
            };

            walker.walk(&results_dir).await.unwrap_or_else(|e| {
                tracing::error!("An unexpected error happened: {:#}", e);
                WalkSummary::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::zip_bytes;
    use crate::config::{BackendConfig, DEFAULT_EXPERIMENT_NAME};
    use crate::tracking::RecordingSink;
    use std::path::PathBuf;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(source: ResultsSource, eval_ms_url: &str, work_dir: PathBuf) -> UploadConfig {
        UploadConfig {
            source,
            experiment_name: DEFAULT_EXPERIMENT_NAME.to_string(),
            eval_ms_url: eval_ms_url.to_string(),
            backend: BackendConfig::DryRun,
            work_dir,
        }
    }

    #[tokio::test]
    async fn test_evaluation_download_is_uploaded_and_cleaned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/evaluations/eval-9/download-results"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes(&[
                ("out/results/beir/beir.json", r#"{"ndcg": 0.5}"#),
                ("out/results/lm-harness.json", r#"{"results": {"arc": {"acc": 0.4}}}"#),
            ])))
            .mount(&server)
            .await;

        let work = tempfile::tempdir().unwrap();
        let sink = RecordingSink::new();
        let cfg = config(
            ResultsSource::Evaluation("eval-9".to_string()),
            &server.uri(),
            work.path().to_path_buf(),
        );

        let summary = run(&cfg, &sink).await;
        assert_eq!(summary.uploaded, 2);
        assert_eq!(sink.run_names(), vec!["beir.json", "lm-harness.json"]);
        assert!(!work.path().join("downloaded_results.zip").exists());
        assert!(!work.path().join("downloaded_results").exists());
    }

    #[tokio::test]
    async fn test_failed_download_uploads_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let work = tempfile::tempdir().unwrap();
        let sink = RecordingSink::new();
        let cfg = config(
            ResultsSource::Evaluation("eval-9".to_string()),
            &server.uri(),
            work.path().to_path_buf(),
        );

        assert_eq!(run(&cfg, &sink).await, WalkSummary::default());
        assert!(sink.calls().is_empty());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_archive_without_results_is_cleaned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(zip_bytes(&[("out/logs/stdout.txt", "hello")])),
            )
            .mount(&server)
            .await;

        let work = tempfile::tempdir().unwrap();
        let sink = RecordingSink::new();
        let cfg = config(
            ResultsSource::Evaluation("eval-9".to_string()),
            &server.uri(),
            work.path().to_path_buf(),
        );

        assert_eq!(run(&cfg, &sink).await, WalkSummary::default());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_directory_is_logged_not_raised() {
        let sink = RecordingSink::new();
        let cfg = config(
            ResultsSource::Directory(PathBuf::from("/no/such/dir")),
            "http://unused",
            PathBuf::from("."),
        );
        assert_eq!(run(&cfg, &sink).await, WalkSummary::default());
    }
}
