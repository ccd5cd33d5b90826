use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};

use super::{file_name_of, read_artifact, RunHandle, RunStatus, TrackingSink};
use crate::errors::TrackingError;
use crate::metric::MetricSample;

const API_PREFIX: &str = "api/2.0/mlflow";
const ARTIFACTS_PREFIX: &str = "api/2.0/mlflow-artifacts/artifacts";
const PROXY_SCHEME: &str = "mlflow-artifacts:";
const RUN_NAME_TAG: &str = "mlflow.runName";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// MLflow tracking server reached over its REST API.
///
/// Artifacts go through the server's artifact proxy, so only runs whose
/// `artifact_uri` uses the `mlflow-artifacts:` scheme can receive files. The
/// server must be started with artifact serving enabled (the default since
/// MLflow 2.0).
#[derive(Debug)]
pub struct MlflowSink {
    client: Client,
    tracking_uri: String,
    token: Option<String>,
    experiment_id: String,
}

impl MlflowSink {
    /// Resolves `experiment_name` to an id, creating the experiment if needed.
    pub async fn connect(
        tracking_uri: &str,
        token: Option<String>,
        insecure_tls: bool,
        experiment_name: &str,
    ) -> Result<Self, TrackingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;

        let mut sink = Self {
            client,
            tracking_uri: tracking_uri.trim_end_matches('/').to_string(),
            token,
            experiment_id: String::new(),
        };
        sink.experiment_id = sink.resolve_experiment(experiment_name).await?;
        tracing::info!(
            "Using MLflow experiment '{}' ({}) at {}",
            experiment_name,
            sink.experiment_id,
            sink.tracking_uri
        );
        Ok(sink)
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}/{}", self.tracking_uri, API_PREFIX, method)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post(&self, method: &str, payload: &Value) -> Result<Value, TrackingError> {
        let request = self.authorize(self.client.post(self.endpoint(method)).json(payload));
        handle_response(request.send().await?).await
    }

    async fn resolve_experiment(&self, name: &str) -> Result<String, TrackingError> {
        let request = self.authorize(
            self.client
                .get(self.endpoint("experiments/get-by-name"))
                .query(&[("experiment_name", name)]),
        );
        match handle_response(request.send().await?).await {
            Ok(body) => string_at(&body, "/experiment/experiment_id"),
            Err(TrackingError::Api { status: 404, .. }) => {
                tracing::info!("Creating MLflow experiment '{}'", name);
                let body = self
                    .post("experiments/create", &json!({ "name": name }))
                    .await?;
                string_at(&body, "/experiment_id")
            }
            Err(e) => Err(e),
        }
    }

    /// Proxy URL for `file_name` under the run's artifact root.
    ///
    /// Runs created without an `artifact_uri` in the response use the
    /// server's default `<experiment>/<run>/artifacts` layout.
    fn artifact_url(
        &self,
        run: &RunHandle,
        artifact_dir: Option<&str>,
        file_name: &str,
    ) -> Result<String, TrackingError> {
        let root = match run.artifact_uri() {
            Some(uri) => proxy_path(uri)?,
            None => format!("{}/{}/artifacts", self.experiment_id, run.id()),
        };
        let mut url = format!("{}/{}", self.tracking_uri, ARTIFACTS_PREFIX);
        let segments = root
            .split('/')
            .chain(artifact_dir.into_iter().flat_map(|dir| dir.split('/')))
            .chain(std::iter::once(file_name))
            .filter(|segment| !segment.is_empty());
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        Ok(url)
    }
}

/// Path below the proxy root for an `mlflow-artifacts:` URI, with or without
/// an authority (`mlflow-artifacts://host:5000/1/abc/artifacts`).
fn proxy_path(uri: &str) -> Result<String, TrackingError> {
    let unsupported = || TrackingError::UnsupportedArtifactStore {
        uri: uri.to_string(),
    };
    let rest = uri.strip_prefix(PROXY_SCHEME).ok_or_else(unsupported)?;
    let path = match rest.strip_prefix("//") {
        Some(authority_and_path) => authority_and_path
            .find('/')
            .map(|slash| &authority_and_path[slash..])
            .ok_or_else(unsupported)?,
        None => rest,
    };
    Ok(path.trim_matches('/').to_string())
}

async fn handle_response(response: Response) -> Result<Value, TrackingError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(text);
        return Err(TrackingError::Api {
            status: status.as_u16(),
            message,
        });
    }

    if text.trim().is_empty() || status == StatusCode::NO_CONTENT {
        return Ok(json!({}));
    }
    serde_json::from_str(&text).map_err(|e| TrackingError::InvalidResponse(e.to_string()))
}

fn string_at(body: &Value, pointer: &str) -> Result<String, TrackingError> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TrackingError::InvalidResponse(format!("missing {} in {}", pointer, body)))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl TrackingSink for MlflowSink {
    async fn start_run(&self, run_name: &str) -> Result<RunHandle, TrackingError> {
        let body = self
            .post(
                "runs/create",
                &json!({
                    "experiment_id": self.experiment_id,
                    "run_name": run_name,
                    "start_time": now_millis(),
                    "tags": [{ "key": RUN_NAME_TAG, "value": run_name }],
                }),
            )
            .await?;
        let run_id = string_at(&body, "/run/info/run_id")?;
        tracing::info!("Run ID: {}", run_id);
        let run = RunHandle::new(run_id, run_name);
        Ok(match body.pointer("/run/info/artifact_uri").and_then(Value::as_str) {
            Some(uri) => run.with_artifact_uri(uri),
            None => run,
        })
    }

    async fn log_metric(
        &self,
        run: &RunHandle,
        metric: &MetricSample,
    ) -> Result<(), TrackingError> {
        self.post(
            "runs/log-metric",
            &json!({
                "run_id": run.id(),
                "key": metric.name,
                "value": metric.value,
                "timestamp": now_millis(),
                "step": metric.step.unwrap_or(0),
            }),
        )
        .await?;
        Ok(())
    }

    async fn log_artifact(
        &self,
        run: &RunHandle,
        path: &Path,
        artifact_dir: Option<&str>,
    ) -> Result<(), TrackingError> {
        let file_name = file_name_of(path)?;
        let url = self.artifact_url(run, artifact_dir, &file_name)?;
        let bytes = read_artifact(path).await?;
        let request = self.authorize(self.client.put(url).body(bytes));
        handle_response(request.send().await?).await?;
        Ok(())
    }

    async fn log_params(
        &self,
        run: &RunHandle,
        params: &BTreeMap<String, String>,
    ) -> Result<(), TrackingError> {
        let params: Vec<Value> = params
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();
        self.post(
            "runs/log-batch",
            &json!({ "run_id": run.id(), "params": params }),
        )
        .await?;
        Ok(())
    }

    async fn end_run(&self, run: RunHandle, status: RunStatus) -> Result<(), TrackingError> {
        self.post(
            "runs/update",
            &json!({
                "run_id": run.id(),
                "status": status.to_string(),
                "end_time": now_millis(),
            }),
        )
        .await?;
        Ok(())
    }
}
