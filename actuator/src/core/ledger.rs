//! Per-operation performance metrics.
//!
//! The ledger is the only mutator of [`OperationMetric`]s. Reporting code gets
//! read-only views. Slow operations are logged, never rejected.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default threshold above which an operation is logged as slow.
pub const DEFAULT_SLOW_OPERATION: Duration = Duration::from_secs(1);

/// Aggregated timings for one operation name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetric {
    pub name: String,
    pub count: u64,
    pub total_duration: Duration,
    pub success_count: u64,
    pub failure_count: u64,
    pub average_duration: Duration,
}

impl OperationMetric {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            count: 0,
            total_duration: Duration::ZERO,
            success_count: 0,
            failure_count: 0,
            average_duration: Duration::ZERO,
        }
    }
}

/// Metrics keyed by operation name, iterated in name order.
#[derive(Debug, Clone)]
pub struct PerformanceLedger {
    metrics: BTreeMap<String, OperationMetric>,
    slow_threshold: Duration,
}

impl Default for PerformanceLedger {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_OPERATION)
    }
}

impl PerformanceLedger {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            metrics: BTreeMap::new(),
            slow_threshold,
        }
    }

    /// Seed the ledger with previously persisted metrics.
    pub fn with_metrics(mut self, metrics: impl IntoIterator<Item = OperationMetric>) -> Self {
        for metric in metrics {
            self.metrics.insert(metric.name.clone(), metric);
        }
        self
    }

    pub fn record(&mut self, name: &str, duration: Duration, success: bool) {
        let metric = self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| OperationMetric::new(name));
        metric.count += 1;
        metric.total_duration += duration;
        if success {
            metric.success_count += 1;
        } else {
            metric.failure_count += 1;
        }
        metric.average_duration = average(metric.total_duration, metric.count);

        if duration > self.slow_threshold {
            warn!(
                operation = name,
                duration_ms = duration.as_millis() as u64,
                "slow operation"
            );
        }
    }

    pub fn metric(&self, name: &str) -> Option<&OperationMetric> {
        self.metrics.get(name)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &OperationMetric> {
        self.metrics.values()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// One line per operation, sorted by name.
    pub fn summary(&self) -> String {
        if self.metrics.is_empty() {
            return "no operations recorded\n".to_string();
        }
        let mut out = String::new();
        for metric in self.metrics.values() {
            out.push_str(&format!(
                "{}: count={} ok={} failed={} avg={:.3}s total={:.3}s\n",
                metric.name,
                metric.count,
                metric.success_count,
                metric.failure_count,
                metric.average_duration.as_secs_f64(),
                metric.total_duration.as_secs_f64(),
            ));
        }
        out
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / u128::from(count);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
