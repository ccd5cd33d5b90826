use std::collections::BTreeMap;

use serde_json::Value;

/// A single numeric measurement extracted from a results file.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub step: Option<i64>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            step: None,
        }
    }

    pub fn with_step(mut self, step: Option<i64>) -> Self {
        self.step = step;
        self
    }
}

/// Returns the value as a float when the JSON value is a number.
///
/// Strings, booleans and nulls are never coerced.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Everything a parser extracted from one file: metrics in file order plus
/// run-level parameters.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MetricBatch {
    samples: Vec<MetricSample>,
    params: BTreeMap<String, String>,
}

impl MetricBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: MetricSample) {
        self.samples.push(sample);
    }

    /// Pushes `name = value` only when `value` is numeric.
    pub fn push_numeric(&mut self, name: impl Into<String>, value: &Value, step: Option<i64>) {
        if let Some(v) = numeric(value) {
            self.push(MetricSample::new(name, v).with_step(step));
        }
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<MetricSample> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_rejects_non_numbers() {
        assert_eq!(numeric(&json!(3)), Some(3.0));
        assert_eq!(numeric(&json!(0.25)), Some(0.25));
        assert_eq!(numeric(&json!("0.5")), None);
        assert_eq!(numeric(&json!(true)), None);
        assert_eq!(numeric(&json!(null)), None);
        assert_eq!(numeric(&json!([1])), None);
    }

    #[test]
    fn test_push_numeric_skips_strings() {
        let mut batch = MetricBatch::new();
        batch.push_numeric("acc", &json!(0.8), Some(5));
        batch.push_numeric("label", &json!("x"), None);
        assert_eq!(batch.len(), 1);
        assert_eq!(
            batch.samples()[0],
            MetricSample::new("acc", 0.8).with_step(Some(5))
        );
    }
}
