pub mod archive;
pub mod config;
pub mod errors;
pub mod formats;
pub mod metric;
pub mod pipeline;
pub mod sanitize;
pub mod session;
pub mod sniff;
pub mod tracking;
pub mod walker;

pub use formats::FormatKind;
pub use metric::MetricSample;
pub use walker::{BatchWalker, WalkSummary};
