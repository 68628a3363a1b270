//! Metrics emitted through the `metrics` facade
//!
//! Nothing is recorded unless the embedding application installs a
//! recorder (e.g. a Prometheus exporter). Metric names share the
//! `pgkeeper_` prefix.

pub mod counters;
pub mod gauges;
pub mod histograms;
pub mod labels;
