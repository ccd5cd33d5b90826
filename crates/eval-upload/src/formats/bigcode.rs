use serde_json::Value;

use super::{as_array, as_object};
use crate::errors::ParseError;
use crate::metric::MetricBatch;

const CONFIG_KEY: &str = "config";

/// Bigcode aggregates are a list of `{task: {metric: result}, "config": {...}}`
/// mappings. `@` in metric names (`pass@1`) is spelled out as `_at_`.
pub(super) fn extract(doc: &Value, batch: &mut MetricBatch) -> Result<(), ParseError> {
    for (index, task_config) in as_array(doc, "$")?.iter().enumerate() {
        for (task_name, task_items) in as_object(task_config, &format!("$[{}]", index))? {
            if task_name == CONFIG_KEY {
                continue;
            }
            let items = as_object(task_items, &format!("$[{}].{}", index, task_name))?;
            for (metric, result) in items {
                batch.push_numeric(metric.replace('@', "_at_"), result, None);
            }
        }
    }
    Ok(())
}
