use serde_json::Value;

use super::as_object;
use crate::errors::ParseError;
use crate::metric::MetricBatch;

/// BEIR writes a flat `{metric: score}` mapping.
pub(super) fn extract(doc: &Value, batch: &mut MetricBatch) -> Result<(), ParseError> {
    for (metric, score) in as_object(doc, "$")? {
        batch.push_numeric(metric.as_str(), score, None);
    }
    Ok(())
}
