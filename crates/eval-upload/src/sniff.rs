//! Decides which results format, if any, a file on disk holds.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::formats::{decode_json, FormatKind};

/// File name probed for the similarity-metrics layout before the generic rules.
pub const RESULTS_JSON: &str = "results.json";

#[derive(Debug, Clone, Copy)]
enum FileMatch {
    StartsWith(&'static str),
    EndsWith(&'static str),
}

impl FileMatch {
    fn matches(&self, file_name: &str) -> bool {
        match self {
            FileMatch::StartsWith(prefix) => file_name.starts_with(prefix),
            FileMatch::EndsWith(suffix) => file_name.ends_with(suffix),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    subdir_contains: Option<&'static str>,
    file: FileMatch,
    format: FormatKind,
}

const fn rule(subdir: &'static str, file: FileMatch, format: FormatKind) -> Rule {
    Rule {
        subdir_contains: Some(subdir),
        file,
        format,
    }
}

/// Evaluated top to bottom; the first matching rule wins.
const GENERIC_RULES: &[Rule] = &[
    rule("beir", FileMatch::StartsWith("beir.json"), FormatKind::Beir),
    rule(
        "multilingual",
        FileMatch::StartsWith("aggregate_scores"),
        FormatKind::Multilingual,
    ),
    rule(
        "bigcode_latest",
        FileMatch::StartsWith("bigcode-aggregate_scores"),
        FormatKind::BigcodeLatest,
    ),
    rule(
        "bigbench",
        FileMatch::StartsWith("aggregate_scores"),
        FormatKind::Bigbench,
    ),
    rule("mtbench", FileMatch::EndsWith("csv"), FormatKind::MtBench),
    rule(
        "custom_eval",
        FileMatch::StartsWith("aggregate_scores"),
        FormatKind::Custom,
    ),
    Rule {
        subdir_contains: None,
        file: FileMatch::StartsWith("lm-harness"),
        format: FormatKind::LmHarness,
    },
];

/// A file matched to exactly one format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub subdir: PathBuf,
    pub file_name: String,
    pub format: FormatKind,
}

impl UploadTarget {
    pub fn path(&self) -> PathBuf {
        self.subdir.join(&self.file_name)
    }
}

/// True when `content` is JSON with a `tasks` mapping where at least one task
/// carries a `metrics` key. Malformed JSON is simply not a match.
pub fn is_similarity_metrics(content: &str) -> bool {
    let Ok(doc) = decode_json(content) else {
        return false;
    };
    doc.get("tasks")
        .and_then(Value::as_object)
        .map(|tasks| tasks.values().any(|task| task.get("metrics").is_some()))
        .unwrap_or(false)
}

/// Path and file name rules only, independent of file content.
pub fn classify_generic(subdir: &str, file_name: &str) -> FormatKind {
    GENERIC_RULES
        .iter()
        .find(|rule| {
            rule.subdir_contains
                .map_or(true, |needle| subdir.contains(needle))
                && rule.file.matches(file_name)
        })
        .map(|rule| rule.format)
        .unwrap_or(FormatKind::Unmatched)
}

/// Classifies `path`, consulting `content` only for `results.json` files.
pub fn classify(path: &Path, content: Option<&str>) -> FormatKind {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        return FormatKind::Unmatched;
    };
    let subdir = path
        .parent()
        .map(|parent| parent.to_string_lossy().into_owned())
        .unwrap_or_default();

    if file_name == RESULTS_JSON && content.is_some_and(is_similarity_metrics) {
        return FormatKind::SimilarityMetrics;
    }
    classify_generic(&subdir, file_name)
}

/// Builds the upload target for `path`, or `None` when no format applies.
pub fn target_for(path: &Path, content: Option<&str>) -> Option<UploadTarget> {
    let format = classify(path, content);
    if format == FormatKind::Unmatched {
        return None;
    }
    Some(UploadTarget {
        subdir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        file_name: path.file_name()?.to_str()?.to_string(),
        format,
    })
}
