use crate::errors::ParseError;
use crate::metric::{MetricBatch, MetricSample};

const TOTAL_MARKER: &str = "total";

/// Drops everything above the first line mentioning `total` and reads the
/// rest as header-less two-column CSV.
pub(super) fn decode(contents: &str) -> Result<Vec<csv::StringRecord>, ParseError> {
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines
        .iter()
        .position(|line| line.contains(TOTAL_MARKER))
        .unwrap_or(0);
    let table = lines[start..].join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(table.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?);
    }
    Ok(rows)
}

pub(super) fn extract(rows: &[csv::StringRecord], batch: &mut MetricBatch) {
    for row in rows {
        let (Some(metric), Some(result)) = (row.get(0), row.get(1)) else {
            continue;
        };
        if let Ok(value) = result.trim().parse::<f64>() {
            if value.is_finite() {
                batch.push(MetricSample::new(metric, value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::formats::FormatKind;
    use crate::metric::MetricSample;

    #[test]
    fn test_starts_at_total_line() {
        let samples = FormatKind::MtBench
            .parse("header\nnoise\ntotal,0.9\nm1,0.7\n")
            .unwrap();
        assert_eq!(
            samples,
            vec![MetricSample::new("total", 0.9), MetricSample::new("m1", 0.7)]
        );
    }

    #[test]
    fn test_without_total_starts_at_first_line() {
        let samples = FormatKind::MtBench
            .parse("writing,8.1\nreasoning,n/a\n\ncoding,5\n")
            .unwrap();
        assert_eq!(
            samples,
            vec![
                MetricSample::new("writing", 8.1),
                MetricSample::new("coding", 5.0)
            ]
        );
    }

    #[test]
    fn test_single_column_rows_are_ignored() {
        let samples = FormatKind::MtBench.parse("total\nturn_1,7.5\n").unwrap();
        assert_eq!(samples, vec![MetricSample::new("turn_1", 7.5)]);
    }
}
