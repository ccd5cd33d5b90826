use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use super::{file_name_of, read_artifact, RunHandle, RunStatus, TrackingSink};
use crate::errors::TrackingError;
use crate::metric::MetricSample;

const HISTORY_FILE: &str = "wandb-history.jsonl";
const RUN_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const RUN_ID_LEN: usize = 8;
const STEP_COLUMN: &str = "num_shots";
const REQUEST_TIMEOUT_SECS: u64 = 120;

const VIEWER_QUERY: &str = r#"
query Viewer {
    viewer { entity }
}"#;

const UPSERT_BUCKET_MUTATION: &str = r#"
mutation UpsertBucket(
    $name: String, $project: String, $entity: String,
    $groupName: String, $displayName: String, $config: JSONString
) {
    upsertBucket(input: {
        name: $name, modelName: $project, entityName: $entity,
        groupName: $groupName, displayName: $displayName, config: $config
    }) {
        bucket { id name displayName }
    }
}"#;

const UPLOAD_URLS_QUERY: &str = r#"
query RunUploadUrls($name: String!, $files: [String]!, $entity: String, $run: String!) {
    model(name: $name, entityName: $entity) {
        bucket(name: $run) {
            id
            files(names: $files) { edges { node { name url(upload: true) } } }
        }
    }
}"#;

/// Weights & Biases backend speaking the GraphQL and file-stream APIs.
///
/// W&B has no experiment object; every run is placed in a group named after
/// the experiment when it is created.
#[derive(Debug)]
pub struct WandbSink {
    client: Client,
    base_url: String,
    api_key: String,
    entity: String,
    project: String,
    group: String,
    history_offsets: Mutex<HashMap<String, usize>>,
}

impl WandbSink {
    pub async fn connect(
        base_url: &str,
        api_key: String,
        entity: Option<String>,
        project: String,
        group: &str,
    ) -> Result<Self, TrackingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let mut sink = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            entity: entity.unwrap_or_default(),
            project,
            group: group.to_string(),
            history_offsets: Mutex::new(HashMap::new()),
        };

        if sink.entity.is_empty() {
            let data = sink.graphql(VIEWER_QUERY, json!({})).await?;
            sink.entity = data
                .pointer("/viewer/entity")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    TrackingError::InvalidResponse("viewer has no default entity".to_string())
                })?;
        }
        tracing::info!(
            "Using W&B project {}/{} grouped under '{}'",
            sink.entity,
            sink.project,
            sink.group
        );
        Ok(sink)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, TrackingError> {
        let response = self
            .client
            .post(format!("{}/graphql", self.base_url))
            .basic_auth("api", Some(&self.api_key))
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| TrackingError::InvalidResponse(e.to_string()))?;

        let errors = body
            .get("errors")
            .and_then(Value::as_array)
            .filter(|errors| !errors.is_empty());
        if !status.is_success() || errors.is_some() {
            let message = errors
                .and_then(|errors| errors[0].get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            return Err(TrackingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn upsert_run(
        &self,
        run_id: &str,
        display_name: Option<&str>,
        config: Option<String>,
    ) -> Result<(), TrackingError> {
        self.graphql(
            UPSERT_BUCKET_MUTATION,
            json!({
                "name": run_id,
                "project": self.project,
                "entity": self.entity,
                "groupName": self.group,
                "displayName": display_name,
                "config": config,
            }),
        )
        .await?;
        Ok(())
    }

    async fn stream(&self, run_id: &str, payload: Value) -> Result<(), TrackingError> {
        let url = format!(
            "{}/files/{}/{}/{}/file_stream",
            self.base_url, self.entity, self.project, run_id
        );
        let response = self
            .client
            .post(url)
            .basic_auth("api", Some(&self.api_key))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackingError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

fn generate_run_id() -> String {
    let mut rng = rand::thread_rng();
    (0..RUN_ID_LEN)
        .map(|_| RUN_ID_ALPHABET[rng.gen_range(0..RUN_ID_ALPHABET.len())] as char)
        .collect()
}

fn history_row(metric: &MetricSample, step: usize) -> Value {
    let mut row = Map::new();
    row.insert("_step".to_string(), json!(step));
    row.insert(
        "_timestamp".to_string(),
        json!(chrono::Utc::now().timestamp_millis() as f64 / 1000.0),
    );
    row.insert(metric.name.clone(), json!(metric.value));
    if let Some(shots) = metric.step {
        row.insert(STEP_COLUMN.to_string(), json!(shots));
    }
    Value::Object(row)
}

#[async_trait]
impl TrackingSink for WandbSink {
    async fn start_run(&self, run_name: &str) -> Result<RunHandle, TrackingError> {
        let run_id = generate_run_id();
        self.upsert_run(&run_id, Some(run_name), None).await?;
        self.history_offsets.lock().await.insert(run_id.clone(), 0);
        tracing::info!("Run ID: {}", run_id);
        Ok(RunHandle::new(run_id, run_name))
    }

    async fn log_metric(
        &self,
        run: &RunHandle,
        metric: &MetricSample,
    ) -> Result<(), TrackingError> {
        let mut offsets = self.history_offsets.lock().await;
        let offset = offsets.entry(run.id().to_string()).or_insert(0);
        let row = history_row(metric, *offset);
        self.stream(
            run.id(),
            json!({
                "files": {
                    HISTORY_FILE: { "offset": *offset, "content": [row.to_string()] }
                }
            }),
        )
        .await?;
        *offset += 1;
        Ok(())
    }

    async fn log_artifact(
        &self,
        run: &RunHandle,
        path: &Path,
        artifact_dir: Option<&str>,
    ) -> Result<(), TrackingError> {
        let file_name = match artifact_dir {
            Some(dir) => format!("{}/{}", dir.trim_end_matches('/'), file_name_of(path)?),
            None => file_name_of(path)?,
        };
        let data = self
            .graphql(
                UPLOAD_URLS_QUERY,
                json!({
                    "name": self.project,
                    "entity": self.entity,
                    "run": run.id(),
                    "files": [file_name],
                }),
            )
            .await?;
        let url = data
            .pointer("/model/bucket/files/edges/0/node/url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TrackingError::InvalidResponse(format!("no upload url for {}", file_name))
            })?
            .to_string();

        let bytes = read_artifact(path).await?;
        let response = self.client.put(url).body(bytes).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackingError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn log_params(
        &self,
        run: &RunHandle,
        params: &BTreeMap<String, String>,
    ) -> Result<(), TrackingError> {
        let config: Map<String, Value> = params
            .iter()
            .map(|(key, value)| (key.clone(), json!({ "value": value, "desc": null })))
            .collect();
        self.upsert_run(run.id(), None, Some(Value::Object(config).to_string()))
            .await
    }

    async fn end_run(&self, run: RunHandle, status: RunStatus) -> Result<(), TrackingError> {
        let exitcode = match status {
            RunStatus::Finished => 0,
            RunStatus::Failed => 1,
        };
        self.history_offsets.lock().await.remove(run.id());
        self.stream(run.id(), json!({ "complete": true, "exitcode": exitcode }))
            .await
    }
}
