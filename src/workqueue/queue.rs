//! The priority work queue.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::clock::{Clock, RealClock};
use super::metrics::QueueMetrics;

/// The lowest priority level of every queue.
pub const DEFAULT_MIN_PRIORITY: i32 = 0;
/// The highest priority level of a default-constructed queue.
pub const DEFAULT_MAX_PRIORITY: i32 = 12;

const DEFAULT_UNFINISHED_WORK_UPDATE_PERIOD: Duration = Duration::from_millis(500);

/// Computes the priority of an item at enqueue time. Higher values are
/// served first. Results are clamped to the queue's priority range.
pub type GetPriorityFn<T> = Box<dyn Fn(&T) -> i32 + Send + Sync>;

/// PriorityQueue is a deduplicating, priority-ordered work queue with
/// cooperative shutdown.
///
/// Many producers add items, many consumers take them with [`get`] and
/// release them with [`done`]. An item is handed to at most one consumer
/// at a time; re-adds of an item that is being processed coalesce into a
/// single follow-up pass, enqueued when the consumer calls [`done`].
/// Every successful [`get`] must be paired with a [`done`], or
/// [`shut_down_with_drain`] blocks forever.
///
/// [`get`]: PriorityQueue::get
/// [`done`]: PriorityQueue::done
/// [`shut_down_with_drain`]: PriorityQueue::shut_down_with_drain
pub struct PriorityQueue<T> {
    min_priority: i32,
    max_priority: i32,
    get_priority: GetPriorityFn<T>,

    state: Mutex<State<T>>,
    cond: Condvar,

    clock: Arc<dyn Clock>,
    unfinished_work_update_period: Duration,
}

struct State<T> {
    /// One FIFO bucket per priority level, indexed from `min_priority`.
    /// Every queued item is in the dirty set and not in processing.
    buckets: Vec<VecDeque<T>>,

    /// All items awaiting processing or re-processing.
    dirty: HashSet<T>,

    /// Items currently held by consumers between get and done. An item
    /// here may simultaneously be dirty; when done removes it from this
    /// set, a dirty item goes back into its bucket.
    processing: HashSet<T>,

    shutting_down: bool,
    drain: bool,

    metrics: QueueMetrics<T>,
}

impl<T> PriorityQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    /// Constructs an unnamed queue with the default priority range and a
    /// priority function that puts everything at the minimum level.
    pub fn new() -> Arc<Self> {
        Self::named("", DEFAULT_MAX_PRIORITY, Box::new(|_| DEFAULT_MIN_PRIORITY))
    }

    /// Constructs a named queue with a custom top priority level and
    /// priority function. The name keys the queue's metrics; an empty
    /// name disables them.
    pub fn named(name: &str, max_priority: i32, get_priority: GetPriorityFn<T>) -> Arc<Self> {
        let clock: Arc<dyn Clock> = Arc::new(RealClock);
        let metrics = QueueMetrics::new(name, Arc::clone(&clock));
        Self::with_config(
            max_priority,
            get_priority,
            clock,
            metrics,
            DEFAULT_UNFINISHED_WORK_UPDATE_PERIOD,
        )
    }

    pub(crate) fn with_config(
        max_priority: i32,
        get_priority: GetPriorityFn<T>,
        clock: Arc<dyn Clock>,
        metrics: QueueMetrics<T>,
        unfinished_work_update_period: Duration,
    ) -> Arc<Self> {
        let min_priority = DEFAULT_MIN_PRIORITY;
        let max_priority = max_priority.max(min_priority);
        let levels = (max_priority - min_priority + 1) as usize;

        let spawn_updater = !metrics.is_noop();
        let queue = Arc::new(PriorityQueue {
            min_priority,
            max_priority,
            get_priority,
            state: Mutex::new(State {
                buckets: (0..levels).map(|_| VecDeque::new()).collect(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
                drain: false,
                metrics,
            }),
            cond: Condvar::new(),
            clock,
            unfinished_work_update_period,
        });

        // The no-op sink skips the updater thread entirely.
        if spawn_updater {
            let updater = Arc::clone(&queue);
            thread::spawn(move || updater.update_unfinished_work_loop());
        }

        queue
    }

    /// Marks an item as needing processing. A no-op if the queue is
    /// shutting down or the item is already awaiting processing.
    pub fn add(&self, item: T) {
        let mut state = self.state.lock();
        if state.shutting_down {
            trace!("dropping add on shut-down queue");
            return;
        }
        if state.dirty.contains(&item) {
            return;
        }

        state.metrics.add(&item);

        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            // Re-bucketed when the consumer calls done.
            return;
        }

        let index = self.bucket_index((self.get_priority)(&item));
        state.buckets[index].push_back(item);
        self.cond.notify_one();
    }

    /// Returns the current number of queued items, for informational
    /// purposes only; it cannot be used to synchronize with add or get.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        Self::queued_len(&state)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until an item is available or the queue shuts down. The
    /// second value is true when the consumer should exit. Every returned
    /// item must be handed back with [`done`](PriorityQueue::done).
    pub fn get(&self) -> (Option<T>, bool) {
        let mut state = self.state.lock();
        while Self::queued_len(&state) == 0 && !state.shutting_down {
            self.cond.wait(&mut state);
        }
        if Self::queued_len(&state) == 0 {
            // We must be shutting down.
            return (None, true);
        }

        // Serve the highest-priority non-empty bucket. Popping moves the
        // item out, so the bucket keeps no reference to it.
        let mut found = None;
        for bucket in state.buckets.iter_mut().rev() {
            if let Some(item) = bucket.pop_front() {
                found = Some(item);
                break;
            }
        }
        let Some(item) = found else {
            return (None, true);
        };

        state.metrics.get(&item);

        state.processing.insert(item.clone());
        state.dirty.remove(&item);
        self.cond.notify_one();

        (Some(item), false)
    }

    /// Marks an item as done processing. If it was re-added while being
    /// processed it goes back into a bucket, at its current priority.
    pub fn done(&self, item: T) {
        let mut state = self.state.lock();

        state.metrics.done(&item);

        state.processing.remove(&item);
        if state.dirty.contains(&item) {
            let index = self.bucket_index((self.get_priority)(&item));
            state.buckets[index].push_back(item);
            self.cond.notify_one();
        } else if state.processing.is_empty() {
            // Drain waiters watch for processing to empty.
            self.cond.notify_all();
        }
    }

    /// Shuts the queue down: new adds are ignored and blocked consumers
    /// wake up with the shutdown flag. Items already handed out may still
    /// be completed with done, and queued items can still be drained by
    /// further gets.
    pub fn shut_down(&self) {
        let mut state = self.state.lock();
        state.drain = false;
        state.shutting_down = true;
        debug!("work queue shutting down");
        self.cond.notify_all();
    }

    /// Shuts the queue down, then blocks until consumers have called done
    /// on every item they were handed. Requires that workers keep calling
    /// done after shutdown begins; a concurrent [`shut_down`] cancels the
    /// wait and forces immediate termination.
    ///
    /// [`shut_down`]: PriorityQueue::shut_down
    pub fn shut_down_with_drain(&self) {
        let mut state = self.state.lock();
        state.drain = true;
        state.shutting_down = true;
        self.cond.notify_all();

        while !state.processing.is_empty() && state.drain {
            self.cond.wait(&mut state);
        }
        debug!("work queue drained");
    }

    pub fn shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    fn queued_len(state: &State<T>) -> usize {
        state.buckets.iter().map(VecDeque::len).sum()
    }

    fn bucket_index(&self, priority: i32) -> usize {
        let clamped = priority.clamp(self.min_priority, self.max_priority);
        (clamped - self.min_priority) as usize
    }

    /// Periodically reports unfinished work until shutdown. Runs on its
    /// own thread; the shutdown broadcast ends it promptly.
    fn update_unfinished_work_loop(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutting_down {
                return;
            }
            let deadline = self.clock.now() + self.unfinished_work_update_period;
            loop {
                let now = self.clock.now();
                if now >= deadline {
                    break;
                }
                let _ = self.cond.wait_for(&mut state, deadline - now);
                if state.shutting_down {
                    return;
                }
            }
            state.metrics.update_unfinished_work();
        }
    }
}
