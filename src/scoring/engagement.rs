//! Engagement rate, completion rate and content consistency

/// `total_engagement / total_views`, `0` when nothing was viewed
#[must_use]
pub fn engagement_rate(total_engagement: u64, total_views: u64) -> f64 {
    if total_views == 0 {
        return 0.0;
    }
    total_engagement as f64 / total_views as f64
}

/// Average watch time over duration, clamped to `[0, 1]`
///
/// Unknown or zero durations yield `0`.
#[must_use]
pub fn completion_rate(avg_watch_time_secs: Option<f64>, duration_secs: Option<f64>) -> f64 {
    match (avg_watch_time_secs, duration_secs) {
        (Some(watched), Some(duration)) if duration > 0.0 && watched.is_finite() => {
            (watched / duration).clamp(0.0, 1.0)
        }
        _ => 0.0,
    }
}

/// Stability of per-post performance relative to the account's own mean
///
/// `1 / (1 + cv)` where `cv` is the coefficient of variation of `values`.
/// Identical performance scores `1`; fewer than two posts or a zero mean
/// give `0` because there is no track record to compare against.
#[must_use]
pub fn content_consistency(values: &[f64]) -> f64 {
    match coefficient_of_variation(values) {
        Some(cv) => 1.0 / (1.0 + cv),
        None => 0.0,
    }
}

/// Population standard deviation over mean; `None` below two samples or at mean 0
pub(crate) fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return None;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt() / mean)
}
