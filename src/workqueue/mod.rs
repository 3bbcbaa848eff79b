//! Workqueue module - Priority work queue for controller event loops.
//!
//! The queue has these properties:
//!
//! - Fair within a priority level: items at the same priority are served
//!   in the order of their most recent enqueue.
//! - Stingy: a single item is never processed by two consumers at once,
//!   and re-adds of an item awaiting processing coalesce.
//! - Strict priority across levels: a consumer always receives an item
//!   from the highest-priority non-empty level.
//! - Cooperative shutdown with an optional drain that waits for in-flight
//!   items to finish.
//! - Pluggable metrics with a no-op default.

mod clock;
mod metrics;
mod queue;


pub use clock::{Clock, FakeClock, RealClock};
pub use metrics::{
    set_metrics_provider, CounterMetric, GaugeMetric, HistogramMetric, MetricsProvider,
    NoopMetricsProvider, SettableGaugeMetric,
};
pub use queue::{
    GetPriorityFn, PriorityQueue, DEFAULT_MAX_PRIORITY, DEFAULT_MIN_PRIORITY,
};
