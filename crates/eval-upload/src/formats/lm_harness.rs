use serde_json::Value;

use super::{as_object, field};
use crate::errors::ParseError;
use crate::metric::MetricBatch;

/// lm-evaluation-harness output; metrics live under `results.<task>.<metric>`.
pub(super) fn extract(doc: &Value, batch: &mut MetricBatch) -> Result<(), ParseError> {
    let results = as_object(field(as_object(doc, "$")?, "results")?, "$.results")?;
    for (task, metrics) in results {
        for (metric, result) in as_object(metrics, &format!("$.results.{}", task))? {
            batch.push_numeric(format!("{}_{}", task, metric), result, None);
        }
    }
    Ok(())
}
