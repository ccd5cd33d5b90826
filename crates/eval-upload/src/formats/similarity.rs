use serde_json::Value;

use super::{as_object, field};
use crate::errors::ParseError;
use crate::metric::MetricBatch;

pub const EVALUATION_TYPE: &str = "similarity_metrics";

/// `tasks.<task>.metrics.<metric>.scores.<score>.value`, logged as `<metric>_<score>`.
///
/// The `task_name` parameter records only the last task visited, matching the
/// reports already stored by earlier uploads.
pub(super) fn extract(doc: &Value, batch: &mut MetricBatch) -> Result<(), ParseError> {
    let tasks = as_object(field(as_object(doc, "$")?, "tasks")?, "$.tasks")?;
    let mut last_task = None;

    for (task_name, task_data) in tasks {
        last_task = Some(task_name);
        let Some(metrics) = task_data.get("metrics") else {
            continue;
        };
        let metrics = as_object(metrics, &format!("$.tasks.{}.metrics", task_name))?;
        for (metric_name, metric_data) in metrics {
            let Some(scores) = metric_data.get("scores").and_then(Value::as_object) else {
                continue;
            };
            for (score_name, score_data) in scores {
                if let Some(value) = score_data.get("value") {
                    batch.push_numeric(format!("{}_{}", metric_name, score_name), value, None);
                }
            }
        }
    }

    if let Some(task_name) = last_task {
        batch.set_param("task_name", task_name.as_str());
    }
    batch.set_param("evaluation_type", EVALUATION_TYPE);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{FormatKind, RawRecord};
    use crate::metric::MetricSample;
    use serde_json::json;

    fn extract_json(doc: Value) -> MetricBatch {
        let mut batch = MetricBatch::new();
        FormatKind::SimilarityMetrics
            .extract(&RawRecord::Json(doc), &mut batch)
            .unwrap();
        batch
    }

    #[test]
    fn test_scores_become_metric_score_names() {
        let batch = extract_json(json!({
            "tasks": {
                "qa": {
                    "metrics": {
                        "bleu": {"scores": {"sentence": {"value": 0.4}, "corpus": {"value": 0.5}}},
                        "rouge": {"scores": {"rougeL": {"value": "bad"}, "rouge1": {"stats": 1}}}
                    }
                }
            }
        }));
        assert_eq!(
            batch.samples(),
            &[
                MetricSample::new("bleu_sentence", 0.4),
                MetricSample::new("bleu_corpus", 0.5)
            ]
        );
        assert_eq!(batch.params()["task_name"], "qa");
        assert_eq!(batch.params()["evaluation_type"], EVALUATION_TYPE);
    }

    #[test]
    fn test_task_name_param_is_last_task() {
        let batch = extract_json(json!({
            "tasks": {
                "first": {"metrics": {"m": {"scores": {"s": {"value": 1}}}}},
                "second": {"other": {}}
            }
        }));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.params()["task_name"], "second");
    }

    #[test]
    fn test_missing_tasks_is_fatal() {
        assert!(FormatKind::SimilarityMetrics.parse("{}").is_err());
    }
}
