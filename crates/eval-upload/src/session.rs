//! One tracking run per results file.

use std::panic::{self, AssertUnwindSafe};

use crate::errors::{ParseError, TrackingError, UploadError};
use crate::metric::MetricBatch;
use crate::sanitize::sanitize;
use crate::sniff::UploadTarget;
use crate::tracking::{RunStatus, TrackingSink};

/// What a completed upload sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub run_name: String,
    pub metrics_logged: usize,
}

pub struct UploadSession<'a> {
    sink: &'a dyn TrackingSink,
    experiment_name: &'a str,
}

impl<'a> UploadSession<'a> {
    pub fn new(sink: &'a dyn TrackingSink, experiment_name: &'a str) -> Self {
        Self {
            sink,
            experiment_name,
        }
    }

    /// Reads, decodes and uploads `target`.
    ///
    /// Read and syntax errors surface before any run is opened.
    pub async fn upload(&self, target: &UploadTarget) -> Result<UploadOutcome, UploadError> {
        let path = target.path();
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ParseError::Io {
                path: path.clone(),
                source,
            })?;
        let record = target.format.decode(&contents)?;
        self.run(target, |batch| target.format.extract(&record, batch))
            .await
    }

    /// Opens a run for `target`, lets `emit` fill a batch, logs it, attaches
    /// the source file and closes the run.
    ///
    /// The run is always closed once opened: `Failed` when emission or any
    /// logging call failed, `Finished` otherwise. Metrics logged before a
    /// failure stay logged. A panic in `emit` closes the run `Failed` before
    /// it resumes.
    ///
    /// Dropping the returned future after the run has opened leaves that run
    /// open at the backend.
    pub async fn run<F>(&self, target: &UploadTarget, emit: F) -> Result<UploadOutcome, UploadError>
    where
        F: FnOnce(&mut MetricBatch) -> Result<(), ParseError>,
    {
        let run_name = target
            .format
            .run_name(&target.file_name, self.experiment_name);
        let run = self.sink.start_run(&run_name).await?;

        let mut batch = MetricBatch::new();
        let emitted = match panic::catch_unwind(AssertUnwindSafe(|| emit(&mut batch))) {
            Ok(emitted) => emitted,
            Err(payload) => {
                if let Err(e) = self.sink.end_run(run, RunStatus::Failed).await {
                    tracing::error!("Failed to close run '{}': {}", run_name, e);
                }
                panic::resume_unwind(payload);
            }
        };
        let mut failure: Option<UploadError> = emitted.err().map(UploadError::from);

        let mut logged = 0;
        for sample in batch.samples() {
            let mut sample = sample.clone();
            sample.name = sanitize(&sample.name);
            tracing::debug!("{} = {} (step {:?})", sample.name, sample.value, sample.step);
            if let Err(e) = self.sink.log_metric(&run, &sample).await {
                keep_first(&mut failure, e);
                break;
            }
            logged += 1;
        }

        if !batch.params().is_empty() {
            if let Err(e) = self.sink.log_params(&run, batch.params()).await {
                keep_first(&mut failure, e);
            }
        }

        let source = target.path();
        if let Err(e) = self
            .sink
            .log_artifact(&run, &source, target.format.artifact_dir())
            .await
        {
            tracing::error!("Failed to attach {}: {}", source.display(), e);
            keep_first(&mut failure, e);
        }

        let status = if failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Finished
        };
        if let Err(e) = self.sink.end_run(run, status).await {
            tracing::error!("Failed to close run '{}': {}", run_name, e);
            keep_first(&mut failure, e);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(UploadOutcome {
                run_name,
                metrics_logged: logged,
            }),
        }
    }
}

fn keep_first(slot: &mut Option<UploadError>, error: TrackingError) {
    if slot.is_none() {
        *slot = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FormatKind;
    use crate::metric::MetricSample;
    use crate::tracking::{RecordingSink, SinkCall};
    use std::path::{Path, PathBuf};

    fn write_target(dir: &Path, subdir: &str, file: &str, body: &str, format: FormatKind) -> UploadTarget {
        let subdir = dir.join(subdir);
        std::fs::create_dir_all(&subdir).unwrap();
        std::fs::write(subdir.join(file), body).unwrap();
        UploadTarget {
            subdir,
            file_name: file.to_string(),
            format,
        }
    }

    #[tokio::test]
    async fn test_full_run_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let target = write_target(
            dir.path(),
            "lm",
            "lm-harness.json",
            r#"{"results": {"arc": {"acc,none": 0.5, "alias": "arc"}}}"#,
            FormatKind::LmHarness,
        );
        let sink = RecordingSink::new();
        let outcome = UploadSession::new(&sink, "exp")
            .upload(&target)
            .await
            .unwrap();

        assert_eq!(outcome.run_name, "lm-harness.json");
        assert_eq!(outcome.metrics_logged, 1);
        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::StartRun {
                    run_id: "run-0".into(),
                    name: "lm-harness.json".into()
                },
                SinkCall::LogMetric {
                    run_id: "run-0".into(),
                    metric: MetricSample::new("arc_accnone", 0.5)
                },
                SinkCall::LogArtifact {
                    run_id: "run-0".into(),
                    path: target.path(),
                    artifact_dir: None
                },
                SinkCall::EndRun {
                    run_id: "run-0".into(),
                    status: RunStatus::Finished
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_schema_error_still_closes_run() {
        let dir = tempfile::tempdir().unwrap();
        let target = write_target(
            dir.path(),
            "lm",
            "lm-harness.json",
            r#"{"no_results": {}}"#,
            FormatKind::LmHarness,
        );
        let sink = RecordingSink::new();
        let err = UploadSession::new(&sink, "exp")
            .upload(&target)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Parse(ParseError::MissingKey { .. })));
        let calls = sink.calls();
        assert!(matches!(calls[1], SinkCall::LogArtifact { .. }));
        assert_eq!(
            calls.last(),
            Some(&SinkCall::EndRun {
                run_id: "run-0".into(),
                status: RunStatus::Failed
            })
        );
    }

    #[tokio::test]
    async fn test_panicking_extractor_still_closes_run() {
        let dir = tempfile::tempdir().unwrap();
        let target = write_target(dir.path(), "beir", "beir.json", "{}", FormatKind::Beir);
        let sink = std::sync::Arc::new(RecordingSink::new());

        let session_sink = std::sync::Arc::clone(&sink);
        let joined = tokio::spawn(async move {
            UploadSession::new(session_sink.as_ref(), "exp")
                .run(&target, |_batch: &mut MetricBatch| -> Result<(), ParseError> {
                    panic!("extractor bug")
                })
                .await
        })
        .await;

        assert!(joined.unwrap_err().is_panic());
        assert_eq!(
            sink.calls().last(),
            Some(&SinkCall::EndRun {
                run_id: "run-0".into(),
                status: RunStatus::Failed
            })
        );
    }

    #[tokio::test]
    async fn test_metrics_before_failure_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let target = write_target(dir.path(), "beir", "beir.json", "{}", FormatKind::Beir);
        let sink = RecordingSink::new();
        let err = UploadSession::new(&sink, "exp")
            .run(&target, |batch| {
                batch.push(MetricSample::new("ndcg@10", 0.3));
                Err(ParseError::MissingKey {
                    key: "scores".into(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Parse(_)));
        assert_eq!(
            sink.metrics_for("run-0"),
            vec![MetricSample::new("ndcg@10", 0.3)]
        );
    }

    #[tokio::test]
    async fn test_malformed_json_opens_no_run() {
        let dir = tempfile::tempdir().unwrap();
        let target = write_target(dir.path(), "beir", "beir.json", "{", FormatKind::Beir);
        let sink = RecordingSink::new();
        let err = UploadSession::new(&sink, "exp")
            .upload(&target)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Parse(ParseError::Json(_))));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_opens_no_run() {
        let sink = RecordingSink::new();
        let target = UploadTarget {
            subdir: PathBuf::from("/definitely/not/here"),
            file_name: "beir.json".into(),
            format: FormatKind::Beir,
        };
        let err = UploadSession::new(&sink, "exp")
            .upload(&target)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Parse(ParseError::Io { .. })));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_metric_fails_run_but_uploads_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let target = write_target(
            dir.path(),
            "beir",
            "beir.json",
            r#"{"a": 1, "b": 2, "c": 3}"#,
            FormatKind::Beir,
        );
        let sink = RecordingSink::new().rejecting_metric("b");
        let err = UploadSession::new(&sink, "exp")
            .upload(&target)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Tracking(TrackingError::Api { status: 400, .. })));
        assert_eq!(sink.metrics_for("run-0"), vec![MetricSample::new("a", 1.0)]);
        let calls = sink.calls();
        assert!(calls
            .iter()
            .any(|c| matches!(c, SinkCall::LogArtifact { .. })));
        assert!(matches!(
            calls.last(),
            Some(SinkCall::EndRun {
                status: RunStatus::Failed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_similarity_run_logs_params_and_raw_results() {
        let dir = tempfile::tempdir().unwrap();
        let target = write_target(
            dir.path(),
            "sim",
            "results.json",
            r#"{"tasks": {"qa": {"metrics": {"bleu": {"scores": {"corpus": {"value": 0.7}}}}}}}"#,
            FormatKind::SimilarityMetrics,
        );
        let sink = RecordingSink::new();
        let outcome = UploadSession::new(&sink, "nightly-eval")
            .upload(&target)
            .await
            .unwrap();
        assert_eq!(outcome.run_name, "nightly-eval");

        let calls = sink.calls();
        assert!(calls.contains(&SinkCall::LogParams {
            run_id: "run-0".into(),
            params: [
                ("evaluation_type".to_string(), "similarity_metrics".to_string()),
                ("task_name".to_string(), "qa".to_string()),
            ]
            .into_iter()
            .collect(),
        }));
        assert!(calls.contains(&SinkCall::LogArtifact {
            run_id: "run-0".into(),
            path: target.path(),
            artifact_dir: Some("raw_results".into()),
        }));
    }
}
