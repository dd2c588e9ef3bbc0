//! ---
//! cosim_section: "03-persistence-logging"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Metrics collection and export utilities."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use ot_cosim_msg::{Envelope, Metric, MetricKind, Pusher, TOPIC_HEALTH};
use ot_cosim_rt::{ShutdownRx, TaskHandle, Ticker};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Cadence at which the reporter emits its registry.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Prefix `name` with `"{module}_"` unless it already carries that prefix.
pub fn qualify_name(module: &str, name: &str) -> String {
    let prefix = format!("{module}_");
    if name.starts_with(&prefix) {
        name.to_owned()
    } else {
        format!("{prefix}{name}")
    }
}

/// Named counters and gauges of one module, periodically pushed on `HEALTH`.
///
/// Clones share the same registry so handlers on other tasks can record into it.
#[derive(Clone, Debug)]
pub struct MetricsReporter {
    module: Arc<str>,
    entries: Arc<Mutex<IndexMap<String, Metric>>>,
}

impl MetricsReporter {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: Arc::from(module.into()),
            entries: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Seed a metric at zero. Re-registering a name resets it.
    pub fn register_metric(&self, kind: MetricKind, name: &str, description: &str) {
        self.entries.lock().insert(
            name.to_owned(),
            Metric {
                kind,
                name: name.to_owned(),
                description: description.to_owned(),
                value: 0.0,
            },
        );
    }

    pub fn increment_counter(&self, name: &str) {
        self.increment_counter_by(name, 1);
    }

    /// Add `delta` to a counter. Unknown names and gauges are ignored.
    pub fn increment_counter_by(&self, name: &str, delta: u64) {
        let mut entries = self.entries.lock();
        match entries.get_mut(name) {
            Some(metric) if metric.kind == MetricKind::Counter => metric.value += delta as f64,
            Some(_) => debug!(module = %self.module, metric = name, "increment on a gauge ignored"),
            None => debug!(module = %self.module, metric = name, "increment on unregistered metric ignored"),
        }
    }

    /// Overwrite a gauge. Unknown names and counters are ignored.
    pub fn set_gauge(&self, name: &str, value: f64) {
        let mut entries = self.entries.lock();
        match entries.get_mut(name) {
            Some(metric) if metric.kind == MetricKind::Gauge => metric.value = value,
            Some(_) => debug!(module = %self.module, metric = name, "set on a counter ignored"),
            None => debug!(module = %self.module, metric = name, "set on unregistered metric ignored"),
        }
    }

    /// Current value of `name`, if registered.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.entries.lock().get(name).map(|metric| metric.value)
    }

    /// Registry contents with module-qualified names, in registration order.
    pub fn snapshot(&self) -> Vec<Metric> {
        let entries = self.entries.lock();
        entries
            .values()
            .map(|metric| Metric {
                name: qualify_name(&self.module, &metric.name),
                ..metric.clone()
            })
            .collect()
    }

    /// Push one `Metric` envelope with the current snapshot. Returns whether
    /// anything was sent; an empty registry emits nothing.
    pub fn report(&self, pusher: &Pusher) -> bool {
        let metrics = self.snapshot();
        if metrics.is_empty() {
            return false;
        }
        let envelope = Envelope::metrics(&*self.module, metrics);
        match pusher.push(TOPIC_HEALTH, &envelope) {
            Ok(()) => true,
            Err(err) => {
                warn!(module = %self.module, error = %err, "metrics push failed");
                if let Err(log_err) = pusher.push_log(&self.module, "ERROR", &err) {
                    debug!(module = %self.module, error = %log_err, "log push failed");
                }
                false
            }
        }
    }

    /// Start reporting every `interval`. The first report is sent one full
    /// interval after start; stopping the handle waits for an in-flight
    /// report to finish.
    pub fn start(&self, pusher: Pusher, interval: Duration) -> TaskHandle<()> {
        let reporter = self.clone();
        TaskHandle::spawn(format!("metrics:{}", self.module), move |shutdown| {
            reporter.run(pusher, interval, shutdown)
        })
    }

    async fn run(self, pusher: Pusher, interval: Duration, mut shutdown: ShutdownRx) {
        let mut ticker = Ticker::new(interval);
        debug!(module = %self.module, period_ms = ticker.period().as_millis() as u64, "metrics reporter started");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.report(&pusher);
                }
            }
        }
        debug!(module = %self.module, "metrics reporter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_cosim_msg::InMemoryBus;

    #[test]
    fn qualification_is_idempotent() {
        let once = qualify_name("dnp3", "status_count");
        assert_eq!(once, "dnp3_status_count");
        assert_eq!(qualify_name("dnp3", &once), once);
    }

    #[test]
    fn counters_sum_non_negative_deltas() {
        let reporter = MetricsReporter::new("io");
        reporter.register_metric(MetricKind::Counter, "update_count", "updates processed");
        let deltas = [0_u64, 1, 5, 0, 12, 3];
        let mut previous = 0.0;
        for delta in deltas {
            reporter.increment_counter_by("update_count", delta);
            let current = reporter.value("update_count").unwrap();
            assert!(current >= previous);
            previous = current;
        }
        reporter.increment_counter("update_count");
        assert_eq!(reporter.value("update_count"), Some(22.0));
    }

    #[test]
    fn operations_respect_kind_and_registration() {
        let reporter = MetricsReporter::new("io");
        reporter.register_metric(MetricKind::Gauge, "queue_depth", "pending updates");
        reporter.register_metric(MetricKind::Counter, "status_count", "statuses");

        reporter.set_gauge("queue_depth", 4.0);
        reporter.set_gauge("queue_depth", 2.0);
        reporter.increment_counter("queue_depth");
        reporter.set_gauge("status_count", 99.0);
        reporter.increment_counter("missing");
        reporter.set_gauge("missing", 1.0);

        assert_eq!(reporter.value("queue_depth"), Some(2.0));
        assert_eq!(reporter.value("status_count"), Some(0.0));
        assert_eq!(reporter.value("missing"), None);
    }

    #[test]
    fn snapshot_prefixes_without_doubling() {
        let reporter = MetricsReporter::new("io");
        reporter.register_metric(MetricKind::Counter, "io_status_count", "already prefixed");
        reporter.register_metric(MetricKind::Counter, "update_count", "bare");
        let names: Vec<String> = reporter.snapshot().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["io_status_count", "io_update_count"]);
    }

    #[test]
    fn empty_registry_reports_nothing() {
        let bus = InMemoryBus::default();
        let mut frames = bus.subscribe();
        let reporter = MetricsReporter::new("idle");
        assert!(!reporter.report(&Pusher::in_memory(&bus)));
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_emits_on_health_each_interval() {
        let bus = InMemoryBus::default();
        let mut frames = bus.subscribe();
        let reporter = MetricsReporter::new("io");
        reporter.register_metric(MetricKind::Counter, "status_count", "statuses");
        reporter.increment_counter_by("status_count", 2);

        let handle = reporter.start(Pusher::in_memory(&bus), DEFAULT_REPORT_INTERVAL);
        let frame = frames.recv().await.expect("first report");
        assert_eq!(frame.topic, TOPIC_HEALTH);
        let envelope = ot_cosim_msg::decode(&frame.payload).expect("decodes");
        assert_eq!(envelope.sender(), "io");
        let metrics = envelope.as_metrics().expect("metric contents");
        assert_eq!(metrics.metrics.len(), 1);
        assert_eq!(metrics.metrics[0].name, "io_status_count");
        assert_eq!(metrics.metrics[0].value, 2.0);

        handle.stop().await.expect("reporter joins");
    }
}
