use serde_json::Value;

use super::{as_array, as_object, field};
use crate::errors::ParseError;
use crate::metric::MetricBatch;

/// Bigbench only reports the first task entry of the aggregate array.
pub(super) fn extract_first(doc: &Value, batch: &mut MetricBatch) -> Result<(), ParseError> {
    let tasks = as_array(doc, "$")?;
    let first = tasks.first().ok_or_else(|| ParseError::UnexpectedShape {
        path: "$[0]".to_string(),
        expected: "at least one task",
    })?;
    extract_task(first, 0, batch)
}

/// Multilingual shares the bigbench layout but every task entry is reported.
pub(super) fn extract_all(doc: &Value, batch: &mut MetricBatch) -> Result<(), ParseError> {
    for (index, task) in as_array(doc, "$")?.iter().enumerate() {
        extract_task(task, index, batch)?;
    }
    Ok(())
}

fn extract_task(task: &Value, index: usize, batch: &mut MetricBatch) -> Result<(), ParseError> {
    let task = as_object(task, &format!("$[{}]", index))?;
    let scores = as_array(field(task, "scores")?, &format!("$[{}].scores", index))?;
    for (i, entry) in scores.iter().enumerate() {
        let entry = as_object(entry, &format!("$[{}].scores[{}]", index, i))?;
        let metric = field(entry, "metric")?;
        let score = field(entry, "score")?;
        let num_shots = field(entry, "num_shots")?.as_i64();
        let metric = match metric {
            Value::String(name) => name.clone(),
            other => other.to_string(),
        };
        batch.push_numeric(metric, score, num_shots);
    }
    Ok(())
}
