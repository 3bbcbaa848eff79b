//! Queue metrics: fine-grained metric traits, a pluggable provider, and
//! the per-queue sink the queue calls under its lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;

use super::clock::Clock;

/// A monotonically increasing counter.
pub trait CounterMetric: Send + Sync {
    fn inc(&self);
}

/// A gauge that moves up and down.
pub trait GaugeMetric: Send + Sync {
    fn inc(&self);
    fn dec(&self);
}

/// A gauge set to an absolute value.
pub trait SettableGaugeMetric: Send + Sync {
    fn set(&self, value: f64);
}

/// An observation histogram.
pub trait HistogramMetric: Send + Sync {
    fn observe(&self, value: f64);
}

struct NoopMetric;

impl CounterMetric for NoopMetric {
    fn inc(&self) {}
}

impl GaugeMetric for NoopMetric {
    fn inc(&self) {}
    fn dec(&self) {}
}

impl SettableGaugeMetric for NoopMetric {
    fn set(&self, _value: f64) {}
}

impl HistogramMetric for NoopMetric {
    fn observe(&self, _value: f64) {}
}

/// MetricsProvider constructs the metrics a named queue reports into.
///
/// Implementations must not block and must not call back into the queue:
/// every metric call happens while the queue's lock is held.
pub trait MetricsProvider: Send + Sync {
    fn new_depth_metric(&self, name: &str) -> Box<dyn GaugeMetric>;
    fn new_adds_metric(&self, name: &str) -> Box<dyn CounterMetric>;
    fn new_latency_metric(&self, name: &str) -> Box<dyn HistogramMetric>;
    fn new_work_duration_metric(&self, name: &str) -> Box<dyn HistogramMetric>;
    fn new_unfinished_work_seconds_metric(&self, name: &str) -> Box<dyn SettableGaugeMetric>;
    fn new_longest_running_processor_seconds_metric(&self, name: &str)
        -> Box<dyn SettableGaugeMetric>;
}

/// NoopMetricsProvider produces metrics that discard every value.
#[derive(Debug, Default)]
pub struct NoopMetricsProvider;

impl MetricsProvider for NoopMetricsProvider {
    fn new_depth_metric(&self, _name: &str) -> Box<dyn GaugeMetric> {
        Box::new(NoopMetric)
    }

    fn new_adds_metric(&self, _name: &str) -> Box<dyn CounterMetric> {
        Box::new(NoopMetric)
    }

    fn new_latency_metric(&self, _name: &str) -> Box<dyn HistogramMetric> {
        Box::new(NoopMetric)
    }

    fn new_work_duration_metric(&self, _name: &str) -> Box<dyn HistogramMetric> {
        Box::new(NoopMetric)
    }

    fn new_unfinished_work_seconds_metric(&self, _name: &str) -> Box<dyn SettableGaugeMetric> {
        Box::new(NoopMetric)
    }

    fn new_longest_running_processor_seconds_metric(
        &self,
        _name: &str,
    ) -> Box<dyn SettableGaugeMetric> {
        Box::new(NoopMetric)
    }
}

static GLOBAL_METRICS_PROVIDER: OnceCell<Box<dyn MetricsProvider>> = OnceCell::new();

/// Registers the process-wide metrics provider. Only the first
/// registration takes effect; queues constructed before it see no-op
/// metrics.
pub fn set_metrics_provider(provider: Box<dyn MetricsProvider>) {
    let _ = GLOBAL_METRICS_PROVIDER.set(provider);
}

/// The per-queue metrics sink. The no-op variant is distinct at runtime
/// so the queue can skip spawning the unfinished-work tick thread.
pub(crate) enum QueueMetrics<T> {
    Noop,
    Default(DefaultQueueMetrics<T>),
}

impl<T: Clone + Eq + Hash> QueueMetrics<T> {
    /// Builds the sink for a queue. Unnamed queues and queues created
    /// before a provider is registered get the no-op sink.
    pub(crate) fn new(name: &str, clock: Arc<dyn Clock>) -> Self {
        if name.is_empty() {
            return QueueMetrics::Noop;
        }
        match GLOBAL_METRICS_PROVIDER.get() {
            Some(provider) => QueueMetrics::with_provider(name, provider.as_ref(), clock),
            None => QueueMetrics::Noop,
        }
    }

    pub(crate) fn with_provider(
        name: &str,
        provider: &dyn MetricsProvider,
        clock: Arc<dyn Clock>,
    ) -> Self {
        QueueMetrics::Default(DefaultQueueMetrics {
            clock,
            depth: provider.new_depth_metric(name),
            adds: provider.new_adds_metric(name),
            latency: provider.new_latency_metric(name),
            work_duration: provider.new_work_duration_metric(name),
            unfinished_work_seconds: provider.new_unfinished_work_seconds_metric(name),
            longest_running_processor_seconds: provider
                .new_longest_running_processor_seconds_metric(name),
            add_times: HashMap::new(),
            processing_start_times: HashMap::new(),
        })
    }

    pub(crate) fn is_noop(&self) -> bool {
        matches!(self, QueueMetrics::Noop)
    }

    pub(crate) fn add(&mut self, item: &T) {
        if let QueueMetrics::Default(m) = self {
            m.add(item);
        }
    }

    pub(crate) fn get(&mut self, item: &T) {
        if let QueueMetrics::Default(m) = self {
            m.get(item);
        }
    }

    pub(crate) fn done(&mut self, item: &T) {
        if let QueueMetrics::Default(m) = self {
            m.done(item);
        }
    }

    pub(crate) fn update_unfinished_work(&mut self) {
        if let QueueMetrics::Default(m) = self {
            m.update_unfinished_work();
        }
    }
}

/// Tracks depth, adds, queue latency, work duration and unfinished work
/// for one queue, keyed by item identity.
pub(crate) struct DefaultQueueMetrics<T> {
    clock: Arc<dyn Clock>,

    depth: Box<dyn GaugeMetric>,
    adds: Box<dyn CounterMetric>,
    latency: Box<dyn HistogramMetric>,
    work_duration: Box<dyn HistogramMetric>,
    unfinished_work_seconds: Box<dyn SettableGaugeMetric>,
    longest_running_processor_seconds: Box<dyn SettableGaugeMetric>,

    add_times: HashMap<T, Instant>,
    processing_start_times: HashMap<T, Instant>,
}

impl<T: Clone + Eq + Hash> DefaultQueueMetrics<T> {
    fn add(&mut self, item: &T) {
        self.adds.inc();
        self.depth.inc();
        let now = self.clock.now();
        self.add_times.entry(item.clone()).or_insert(now);
    }

    fn get(&mut self, item: &T) {
        self.depth.dec();
        self.processing_start_times
            .insert(item.clone(), self.clock.now());
        if let Some(added) = self.add_times.remove(item) {
            self.latency.observe(self.clock.since(added).as_secs_f64());
        }
    }

    fn done(&mut self, item: &T) {
        if let Some(started) = self.processing_start_times.remove(item) {
            self.work_duration
                .observe(self.clock.since(started).as_secs_f64());
        }
    }

    fn update_unfinished_work(&mut self) {
        let mut total = Duration::ZERO;
        let mut oldest = Duration::ZERO;
        for started in self.processing_start_times.values() {
            let age = self.clock.since(*started);
            total += age;
            oldest = oldest.max(age);
        }
        self.unfinished_work_seconds.set(total.as_secs_f64());
        self.longest_running_processor_seconds
            .set(oldest.as_secs_f64());
    }
}
