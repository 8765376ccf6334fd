/// Clamp degenerate evaluation results before storage or formatting.
///
/// Expression evaluation over a sparse snapshot can produce NaN or infinite
/// values (mean over zero samples, rate over zero time); they must never
/// reach report files or published samples.
#[must_use]
pub fn real_double_value(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Render a report value with up to three decimal places and no grouping
/// separators. Missing values render as `"0"`.
#[must_use]
pub fn format_value(value: Option<f64>) -> String {
    match value {
        None => "0".to_owned(),
        Some(raw) => {
            let clamped = real_double_value(raw);
            let rendered = format!("{:.3}", clamped);
            rendered
                .trim_end_matches('0')
                .trim_end_matches('.')
                .to_owned()
        }
    }
}
