//! Metrics/Health reporting
//!
//! [`ScraperMetrics`] is the counter set every module records into. The
//! [`MetricsReporter`] snapshots it on a fixed interval and hands the points
//! to a [`MetricsSink`]; [`HealthReport`] folds pool, registry, breaker and
//! queue state into a single status.

pub mod counters;
pub mod health;
pub mod reporter;
pub mod sink;

pub use counters::{MetricsSnapshot, ScraperMetrics};
pub use health::{HealthInputs, HealthReport, HealthStatus};
pub use reporter::{MetricsPoint, MetricsReporter};
pub use sink::{InfluxLineSink, LogSink, MetricsSink};
