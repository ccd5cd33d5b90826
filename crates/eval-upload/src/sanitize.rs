/// Characters the tracking backends reject in metric keys.
pub const FORBIDDEN_METRIC_CHARS: [char; 6] = [';', ':', '!', '*', ' ', ','];

/// Strips every forbidden character from a metric name, keeping the rest in order.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !FORBIDDEN_METRIC_CHARS.contains(c))
        .collect()
}
