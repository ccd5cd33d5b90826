use serde_json::Value;

use super::as_object;
use crate::errors::ParseError;
use crate::metric::MetricBatch;

/// `{model: {scorer: {metric: result}}}`; only the innermost key names the metric.
pub(super) fn extract(doc: &Value, batch: &mut MetricBatch) -> Result<(), ParseError> {
    for (model, scorers) in as_object(doc, "$")? {
        for (scorer, metrics) in as_object(scorers, &format!("$.{}", model))? {
            for (metric, result) in as_object(metrics, &format!("$.{}.{}", model, scorer))? {
                batch.push_numeric(metric.as_str(), result, None);
            }
        }
    }
    Ok(())
}
