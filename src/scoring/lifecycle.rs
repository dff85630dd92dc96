//! Trend growth and lifecycle classification
//!
//! Usage history is a series of per-period usage counts (new videos using a
//! sound or hashtag per period), oldest first. The lifecycle stage is folded
//! over every prefix of that history, so it only ever moves forward and is a
//! pure function of the history itself.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::engagement::coefficient_of_variation;
use super::weights::LifecycleThresholds;

/// Ordered lifecycle stages; `Evergreen` is terminal and reachable from any stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLifecycle {
    #[default]
    Emerging,
    Rising,
    Peak,
    Declining,
    Evergreen,
}

impl TrendLifecycle {
    /// Next stage given a fresh observation; never moves backwards
    #[must_use]
    pub fn advance(self, observed: TrendLifecycle) -> TrendLifecycle {
        self.max(observed)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emerging => "emerging",
            Self::Rising => "rising",
            Self::Peak => "peak",
            Self::Declining => "declining",
            Self::Evergreen => "evergreen",
        }
    }
}

impl fmt::Display for TrendLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Growth of the latest period over the one before it
///
/// Fewer than two periods is `0`; growth from an empty period is `1`.
#[must_use]
pub fn growth_rate(history: &[u64]) -> f64 {
    match history {
        [.., prev, last] => {
            if *prev == 0 {
                if *last > 0 { 1.0 } else { 0.0 }
            } else {
                (*last as f64 - *prev as f64) / *prev as f64
            }
        }
        _ => 0.0,
    }
}

/// Stage suggested by a history window on its own
#[must_use]
pub fn observe(history: &[u64], t: &LifecycleThresholds) -> TrendLifecycle {
    let Some(&last) = history.last() else {
        return TrendLifecycle::Emerging;
    };

    if t.evergreen_min_periods >= 2 && history.len() >= t.evergreen_min_periods {
        let window: Vec<f64> = history[history.len() - t.evergreen_min_periods..]
            .iter()
            .map(|v| *v as f64)
            .collect();
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        if mean >= t.emerging_max_usage as f64
            && coefficient_of_variation(&window).is_some_and(|cv| cv <= t.evergreen_max_cv)
        {
            return TrendLifecycle::Evergreen;
        }
    }

    if history.len() < 2 {
        return TrendLifecycle::Emerging;
    }

    let growth = growth_rate(history);
    let peak_usage = history.iter().copied().max().unwrap_or(0);
    if growth <= t.declining_growth && peak_usage >= t.emerging_max_usage {
        return TrendLifecycle::Declining;
    }
    if last < t.emerging_max_usage {
        return TrendLifecycle::Emerging;
    }
    if growth >= t.rising_growth {
        TrendLifecycle::Rising
    } else {
        TrendLifecycle::Peak
    }
}

/// Lifecycle stage after replaying every prefix of `history`
#[must_use]
pub fn classify(history: &[u64], t: &LifecycleThresholds) -> TrendLifecycle {
    (1..=history.len()).fold(TrendLifecycle::Emerging, |stage, end| {
        stage.advance(observe(&history[..end], t))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> LifecycleThresholds {
        LifecycleThresholds::default()
    }

    #[test]
    fn growth() {
        assert_eq!(growth_rate(&[]), 0.0);
        assert_eq!(growth_rate(&[10]), 0.0);
        assert_eq!(growth_rate(&[100, 150]), 0.5);
        assert_eq!(growth_rate(&[0, 3]), 1.0);
        assert_eq!(growth_rate(&[200, 100]), -0.5);
    }

    #[test]
    fn small_counts_are_emerging() {
        assert_eq!(classify(&[5, 20, 60], &t()), TrendLifecycle::Emerging);
    }

    #[test]
    fn rise_peak_decline() {
        assert_eq!(classify(&[100, 800, 2_000], &t()), TrendLifecycle::Rising);
        assert_eq!(classify(&[100, 800, 2_000, 2_100], &t()), TrendLifecycle::Peak);
        assert_eq!(
            classify(&[100, 800, 2_000, 2_100, 1_200], &t()),
            TrendLifecycle::Declining
        );
    }

    #[test]
    fn decline_never_returns_to_rising() {
        let history = [100, 800, 2_000, 1_000, 3_000];
        assert_eq!(classify(&history, &t()), TrendLifecycle::Declining);
    }

    #[test]
    fn steady_usage_becomes_evergreen_from_any_stage() {
        let mut history = vec![500, 3_000, 1_500];
        assert_eq!(classify(&history, &t()), TrendLifecycle::Declining);
        history.extend([1_500; 8]);
        assert_eq!(classify(&history, &t()), TrendLifecycle::Evergreen);
    }
}
