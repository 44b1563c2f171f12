//! Prometheus metrics for the watcher.

use crate::types::ChangeSet;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for check outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    /// Outcome (ok, bad, error)
    pub outcome: String,
}

/// Labels for change metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AspectLabels {
    /// Changed aspect (content, status_or_error)
    pub aspect: String,
}

/// Labels for health gauges
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HealthLabels {
    /// Health (good, bad)
    pub health: String,
}

/// Metrics registry with all watcher metrics
pub struct WatcherMetrics {
    /// Prometheus registry
    pub registry: Registry,

    checks_total: Family<OutcomeLabels, Counter>,
    check_duration_seconds: Histogram,
    changes_total: Family<AspectLabels, Counter>,
    checks_in_flight: Gauge,
    resources: Family<HealthLabels, Gauge>,
    store_errors_total: Counter,
    dedup_violations_total: Counter,
}

impl WatcherMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let checks_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "webwatch_checks",
            "Total checks performed",
            checks_total.clone(),
        );

        // 5ms to ~20s
        let check_duration_seconds = Histogram::new(exponential_buckets(0.005, 2.0, 13));
        registry.register(
            "webwatch_check_duration_seconds",
            "Check duration in seconds",
            check_duration_seconds.clone(),
        );

        let changes_total = Family::<AspectLabels, Counter>::default();
        registry.register(
            "webwatch_changes",
            "Detected changes by aspect",
            changes_total.clone(),
        );

        let checks_in_flight = Gauge::default();
        registry.register(
            "webwatch_checks_in_flight",
            "Checks dispatched and not yet returned",
            checks_in_flight.clone(),
        );

        let resources = Family::<HealthLabels, Gauge>::default();
        registry.register(
            "webwatch_resources",
            "Monitored resources by health",
            resources.clone(),
        );

        let store_errors_total = Counter::default();
        registry.register(
            "webwatch_store_errors",
            "Failed state store writes",
            store_errors_total.clone(),
        );

        let dedup_violations_total = Counter::default();
        registry.register(
            "webwatch_dedup_violations",
            "Results received for resources not in flight",
            dedup_violations_total.clone(),
        );

        Self {
            registry,
            checks_total,
            check_duration_seconds,
            changes_total,
            checks_in_flight,
            resources,
            store_errors_total,
            dedup_violations_total,
        }
    }

    /// Record a completed check
    pub fn record_check(&self, outcome: &str, duration: Duration) {
        self.checks_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
        self.check_duration_seconds.observe(duration.as_secs_f64());
    }

    /// Record the aspects of a detected change
    pub fn record_change(&self, changed: &ChangeSet) {
        for aspect in changed.iter() {
            self.changes_total
                .get_or_create(&AspectLabels {
                    aspect: aspect.to_string(),
                })
                .inc();
        }
    }

    pub fn set_in_flight(&self, count: usize) {
        self.checks_in_flight.set(count as i64);
    }

    /// Update the good/bad resource gauges
    pub fn set_health(&self, good: usize, bad: usize) {
        self.resources
            .get_or_create(&HealthLabels {
                health: "good".to_string(),
            })
            .set(good as i64);
        self.resources
            .get_or_create(&HealthLabels {
                health: "bad".to_string(),
            })
            .set(bad as i64);
    }

    pub fn record_store_error(&self) {
        self.store_errors_total.inc();
    }

    pub fn record_dedup_violation(&self) {
        self.dedup_violations_total.inc();
    }
}

impl Default for WatcherMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Aspect;
    use prometheus_client::encoding::text::encode;

    fn render(metrics: &WatcherMetrics) -> String {
        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry).unwrap();
        buffer
    }

    #[test]
    fn test_record_check() {
        let metrics = WatcherMetrics::new();
        metrics.record_check("ok", Duration::from_millis(20));
        metrics.record_check("error", Duration::from_millis(5000));

        let text = render(&metrics);
        assert!(text.contains("webwatch_checks_total{outcome=\"ok\"} 1"));
        assert!(text.contains("webwatch_checks_total{outcome=\"error\"} 1"));
        assert!(text.contains("webwatch_check_duration_seconds_count 2"));
    }

    #[test]
    fn test_record_change() {
        let metrics = WatcherMetrics::new();
        let mut changed = ChangeSet::default();
        changed.insert(Aspect::Content);
        changed.insert(Aspect::StatusOrError);
        metrics.record_change(&changed);

        let text = render(&metrics);
        assert!(text.contains("webwatch_changes_total{aspect=\"content\"} 1"));
        assert!(text.contains("webwatch_changes_total{aspect=\"status_or_error\"} 1"));
    }

    #[test]
    fn test_gauges() {
        let metrics = WatcherMetrics::new();
        metrics.set_in_flight(3);
        metrics.set_health(4, 1);
        metrics.record_store_error();
        metrics.record_dedup_violation();

        let text = render(&metrics);
        assert!(text.contains("webwatch_checks_in_flight 3"));
        assert!(text.contains("webwatch_resources{health=\"good\"} 4"));
        assert!(text.contains("webwatch_resources{health=\"bad\"} 1"));
        assert!(text.contains("webwatch_store_errors_total 1"));
    }
}
