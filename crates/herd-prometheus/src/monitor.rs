use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder, proto::MetricFamily};

/// Counters of one job monitor.
///
/// Cloning is cheap; clones share the same registry and counters.
#[derive(Clone)]
pub struct MonitorMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    store_connectivity_failed: IntCounter,
    orchestrator_connectivity_failed: IntCounter,
    insufficient_resources: IntCounter,
    image_pull_failed: IntCounter,
    trainer_connectivity_failed: IntCounter,
    status_transitions: IntCounterVec,
    illegal_transitions: IntCounter,
    teardown: IntCounterVec,
}

impl MonitorMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let counter_vec =
            |name: &str, help: &str, label: &str| -> Result<IntCounterVec, prometheus::Error> {
                let c = IntCounterVec::new(Opts::new(name, help), &[label])?;
                registry.register(Box::new(c.clone()))?;
                Ok(c)
            };

        let inner = Inner {
            store_connectivity_failed: counter(
                "herd_store_connectivity_failed_total",
                "Failed attempts to reach the coordination store",
            )?,
            orchestrator_connectivity_failed: counter(
                "herd_orchestrator_connectivity_failed_total",
                "Failed attempts to reach the orchestrator",
            )?,
            insufficient_resources: counter(
                "herd_insufficient_resources_total",
                "Jobs failed because pods stayed pending",
            )?,
            image_pull_failed: counter(
                "herd_image_pull_failed_total",
                "Jobs failed because a learner image could not be pulled",
            )?,
            trainer_connectivity_failed: counter(
                "herd_trainer_connectivity_failed_total",
                "Failed status reports to the trainer",
            )?,
            status_transitions: counter_vec(
                "herd_status_transitions_total",
                "Overall status transitions applied, by target status",
                "status",
            )?,
            illegal_transitions: counter(
                "herd_illegal_transitions_total",
                "Learner updates dropped by the transition lattice",
            )?,
            teardown: counter_vec(
                "herd_teardown_total",
                "Teardown requests, by outcome",
                "outcome",
            )?,
            registry,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn store_connectivity_failed(&self) {
        self.inner.store_connectivity_failed.inc();
    }

    pub fn orchestrator_connectivity_failed(&self) {
        self.inner.orchestrator_connectivity_failed.inc();
    }

    pub fn insufficient_resources(&self) {
        self.inner.insufficient_resources.inc();
    }

    pub fn image_pull_failed(&self) {
        self.inner.image_pull_failed.inc();
    }

    pub fn trainer_connectivity_failed(&self) {
        self.inner.trainer_connectivity_failed.inc();
    }

    pub fn status_transition(&self, status: &str) {
        self.inner.status_transitions.with_label_values(&[status]).inc();
    }

    pub fn illegal_transition(&self) {
        self.inner.illegal_transitions.inc();
    }

    /// `outcome` is `ok`, `failed` or `skipped`.
    pub fn teardown(&self, outcome: &str) {
        self.inner.teardown.with_label_values(&[outcome]).inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.registry.gather()
    }

    /// Text exposition format of every family.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sum of the samples of `name` whose line mentions `label`, read from the text exposition.
    fn counter_value(metrics: &MonitorMetrics, name: &str, label: Option<(&str, &str)>) -> u64 {
        let text = metrics.encode_text().unwrap();
        let needle = label.map(|(k, v)| format!("{k}=\"{v}\""));
        text.lines()
            .filter(|line| !line.starts_with('#'))
            .filter(|line| line.starts_with(&format!("{name} ")) || line.starts_with(&format!("{name}{{")))
            .filter(|line| needle.as_ref().is_none_or(|n| line.contains(n.as_str())))
            .filter_map(|line| line.rsplit(' ').next()?.parse::<f64>().ok())
            .map(|v| v as u64)
            .sum()
    }

    #[test]
    fn counters_are_isolated_per_instance() {
        let a = MonitorMetrics::new().unwrap();
        let b = MonitorMetrics::new().unwrap();

        a.store_connectivity_failed();
        a.store_connectivity_failed();

        assert_eq!(counter_value(&a, "herd_store_connectivity_failed_total", None), 2);
        assert_eq!(counter_value(&b, "herd_store_connectivity_failed_total", None), 0);
    }

    #[test]
    fn labelled_counters() {
        let m = MonitorMetrics::new().unwrap();
        m.status_transition("PROCESSING");
        m.status_transition("PROCESSING");
        m.status_transition("COMPLETED");
        m.teardown("ok");

        let transitions = "herd_status_transitions_total";
        assert_eq!(counter_value(&m, transitions, Some(("status", "PROCESSING"))), 2);
        assert_eq!(counter_value(&m, transitions, Some(("status", "COMPLETED"))), 1);
        assert_eq!(counter_value(&m, "herd_teardown_total", Some(("outcome", "ok"))), 1);
    }

    #[test]
    fn text_encoding_contains_families() {
        let m = MonitorMetrics::new().unwrap();
        m.image_pull_failed();
        let text = m.encode_text().unwrap();
        assert!(text.contains("herd_image_pull_failed_total 1"));
    }
}
