//! Result file formats produced by the supported evaluation harnesses.
//!
//! Each harness writes metrics in its own layout. A file is first decoded into a
//! [`RawRecord`] (syntax only) and then walked by the format's extractor, which
//! appends every numeric metric it finds to a [`MetricBatch`].

mod beir;
mod bigbench;
mod bigcode;
mod custom;
mod lm_harness;
mod mt_bench;
mod similarity;

use std::borrow::Cow;
use std::fmt;

use serde_json::{Map, Value};

use crate::errors::ParseError;
use crate::metric::{MetricBatch, MetricSample};

/// Run name used for similarity-metrics uploads when no experiment name is set.
pub const SIMILARITY_DEFAULT_RUN_NAME: &str = "Similarity Metrics Evaluation";

/// Artifact directory the similarity-metrics source file is stored under.
pub const SIMILARITY_ARTIFACT_DIR: &str = "raw_results";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Beir,
    Bigbench,
    BigcodeLatest,
    MtBench,
    Custom,
    LmHarness,
    Multilingual,
    SimilarityMetrics,
    Unmatched,
}

/// A decoded results document, read-only once produced.
#[derive(Debug, Clone)]
pub enum RawRecord {
    Json(Value),
    Rows(Vec<csv::StringRecord>),
}

impl FormatKind {
    pub fn label(&self) -> &'static str {
        match self {
            FormatKind::Beir => "beir",
            FormatKind::Bigbench => "bigbench",
            FormatKind::BigcodeLatest => "bigcode_latest",
            FormatKind::MtBench => "mtbench",
            FormatKind::Custom => "custom_eval",
            FormatKind::LmHarness => "lm_harness",
            FormatKind::Multilingual => "multilingual",
            FormatKind::SimilarityMetrics => "similarity_metrics",
            FormatKind::Unmatched => "unmatched",
        }
    }

    /// Name of the tracking run opened for `file_name`.
    pub fn run_name(&self, file_name: &str, experiment_name: &str) -> String {
        match self {
            FormatKind::Beir | FormatKind::LmHarness | FormatKind::Unmatched => {
                file_name.to_string()
            }
            FormatKind::SimilarityMetrics => {
                if experiment_name.is_empty() {
                    SIMILARITY_DEFAULT_RUN_NAME.to_string()
                } else {
                    experiment_name.to_string()
                }
            }
            other => format!("{}_{}", other.label(), file_name),
        }
    }

    pub fn artifact_dir(&self) -> Option<&'static str> {
        match self {
            FormatKind::SimilarityMetrics => Some(SIMILARITY_ARTIFACT_DIR),
            _ => None,
        }
    }

    /// Syntax-level decode of the file contents.
    pub fn decode(&self, contents: &str) -> Result<RawRecord, ParseError> {
        match self {
            FormatKind::Unmatched => Err(ParseError::Unsupported),
            FormatKind::MtBench => mt_bench::decode(contents).map(RawRecord::Rows),
            _ => Ok(RawRecord::Json(decode_json(contents)?)),
        }
    }

    /// Walks a decoded record and appends its metrics to `batch`.
    ///
    /// Samples pushed before a schema error stay in the batch.
    pub fn extract(&self, record: &RawRecord, batch: &mut MetricBatch) -> Result<(), ParseError> {
        match (self, record) {
            (FormatKind::MtBench, RawRecord::Rows(rows)) => {
                mt_bench::extract(rows, batch);
                Ok(())
            }
            (FormatKind::Beir, RawRecord::Json(doc)) => beir::extract(doc, batch),
            (FormatKind::Bigbench, RawRecord::Json(doc)) => bigbench::extract_first(doc, batch),
            (FormatKind::Multilingual, RawRecord::Json(doc)) => bigbench::extract_all(doc, batch),
            (FormatKind::BigcodeLatest, RawRecord::Json(doc)) => bigcode::extract(doc, batch),
            (FormatKind::Custom, RawRecord::Json(doc)) => custom::extract(doc, batch),
            (FormatKind::LmHarness, RawRecord::Json(doc)) => lm_harness::extract(doc, batch),
            (FormatKind::SimilarityMetrics, RawRecord::Json(doc)) => {
                similarity::extract(doc, batch)
            }
            _ => Err(ParseError::Unsupported),
        }
    }

    /// Decodes and extracts in one step, failing on the first error.
    pub fn parse(&self, contents: &str) -> Result<Vec<MetricSample>, ParseError> {
        let record = self.decode(contents)?;
        let mut batch = MetricBatch::new();
        self.extract(&record, &mut batch)?;
        Ok(batch.into_samples())
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Bare literals Python's `json` module writes for non-finite floats.
const NON_FINITE_LITERALS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// Decodes JSON, reading `NaN`, `Infinity` and `-Infinity` as `null`.
pub(crate) fn decode_json(contents: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(&null_non_finite(contents))
}

/// Replaces non-finite literals outside string values with `null`.
fn null_non_finite(text: &str) -> Cow<'_, str> {
    if !NON_FINITE_LITERALS.iter().any(|literal| text.contains(literal)) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut in_string = false;
    let mut escaped = false;
    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(literal) = NON_FINITE_LITERALS
            .iter()
            .find(|literal| rest.starts_with(**literal))
        {
            out.push_str("null");
            rest = &rest[literal.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    Cow::Owned(out)
}

pub(crate) fn as_object<'a>(
    value: &'a Value,
    path: &str,
) -> Result<&'a Map<String, Value>, ParseError> {
    value.as_object().ok_or_else(|| ParseError::UnexpectedShape {
        path: path.to_string(),
        expected: "an object",
    })
}

pub(crate) fn as_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>, ParseError> {
    value.as_array().ok_or_else(|| ParseError::UnexpectedShape {
        path: path.to_string(),
        expected: "an array",
    })
}

pub(crate) fn field<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a Value, ParseError> {
    object.get(key).ok_or_else(|| ParseError::MissingKey {
        key: key.to_string(),
    })
}
