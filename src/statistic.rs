//! Per-resource fixed-window traffic statistic.
//!
//! Each resource owns a `(window_start, admitted)` pair guarded by its own mutex,
//! so the read-compare-increment of one resource is atomic while different
//! resources never contend. The resource map itself is only read-locked on the
//! hot path; the write lock is taken to create a window lazily on the first
//! consumption of a governed resource and by [`TrafficStatistic::sweep_idle`].
//! Resources without a rule never get a window.
//!
//! # Window boundaries
//!
//! Windows are fixed, not sliding: a window starts at the first consumption after
//! the previous one expired and the counter resets to zero once
//! `now >= window_start + window_ms`. A client can therefore be admitted up to
//! `2 * threshold` times across a boundary (a full window at the end of one
//! window and again at the start of the next). This is the accepted trade-off of
//! the fixed-window counter and tests rely on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::debug;

use crate::clock::{Clock, MonotonicClock};

#[derive(Debug, Default)]
struct WindowState {
    start: u64,
    window_ms: u64,
    admitted: u64,
    blocked: u64,
}

/// Counters of one resource. Shared between the statistic and live entries.
#[derive(Debug)]
pub(crate) struct ResourceNode {
    window: Mutex<WindowState>,
    in_flight: AtomicU64,
    completed: AtomicU64,
    last_touched: AtomicU64,
}

impl ResourceNode {
    fn new(now: u64) -> Self {
        Self {
            window: Mutex::new(WindowState { start: now, ..WindowState::default() }),
            in_flight: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            last_touched: AtomicU64::new(now),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        // Every critical section leaves the state consistent, so a poisoned lock
        // is still safe to use.
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_consume(&self, now: u64, threshold: f64, window_ms: u64) -> bool {
        let mut state = self.lock();
        if now >= state.start.saturating_add(window_ms) {
            state.start = now;
            state.admitted = 0;
            state.blocked = 0;
        }
        state.window_ms = window_ms;
        self.last_touched.store(now, Ordering::Relaxed);
        if (state.admitted as f64) < threshold {
            state.admitted += 1;
            true
        } else {
            state.blocked += 1;
            false
        }
    }

    pub(crate) fn enter(&self, now: u64) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.last_touched.store(now, Ordering::Relaxed);
    }

    pub(crate) fn exit(&self) {
        // Saturating: a stray release can never wrap the gauge.
        let _ = self.in_flight.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn window_open(&self, now: u64) -> bool {
        let state = self.lock();
        state.window_ms > 0 && now < state.start.saturating_add(state.window_ms)
    }

    fn snapshot(&self, resource: &str, now: u64) -> WindowSnapshot {
        let state = self.lock();
        let expired = state.window_ms > 0 && now >= state.start.saturating_add(state.window_ms);
        WindowSnapshot {
            resource: resource.to_string(),
            window_start_millis: state.start,
            admitted: if expired { 0 } else { state.admitted },
            blocked: if expired { 0 } else { state.blocked },
            in_flight: self.in_flight.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one resource's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Resource identifier.
    pub resource: String,
    /// Start of the current window, in clock milliseconds.
    pub window_start_millis: u64,
    /// Requests admitted in the current window.
    pub admitted: u64,
    /// Requests blocked in the current window.
    pub blocked: u64,
    /// Admitted requests whose entry has not been released yet.
    pub in_flight: u64,
    /// Entries released since the window was created.
    pub completed: u64,
}

/// Fixed-window counters for every resource seen so far.
#[derive(Debug)]
pub struct TrafficStatistic {
    nodes: RwLock<HashMap<String, Arc<ResourceNode>>>,
    clock: Arc<dyn Clock>,
}

impl Default for TrafficStatistic {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficStatistic {
    /// Statistic driven by a [`MonotonicClock`].
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::default()))
    }

    /// Statistic driven by a custom clock (useful for deterministic tests).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { nodes: RwLock::new(HashMap::new()), clock }
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub(crate) fn node(&self, resource: &str) -> Arc<ResourceNode> {
        {
            let nodes = self.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(node) = nodes.get(resource) {
                return node.clone();
            }
        }
        let now = self.now_millis();
        let mut nodes = self.nodes.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        nodes
            .entry(resource.to_string())
            .or_insert_with(|| {
                debug!(target: "flowgate::statistic", resource, "window created");
                Arc::new(ResourceNode::new(now))
            })
            .clone()
    }

    pub(crate) fn consume_node(
        &self,
        resource: &str,
        threshold: f64,
        window_ms: u64,
    ) -> (Arc<ResourceNode>, bool) {
        let node = self.node(resource);
        let admitted = node.try_consume(self.now_millis(), threshold, window_ms);
        (node, admitted)
    }

    /// Count one unit against `resource` if its current window still has room
    /// under `threshold`. Returns `false` once the window is exhausted.
    pub fn try_consume(&self, resource: &str, threshold: f64, window_ms: u64) -> bool {
        self.consume_node(resource, threshold, window_ms).1
    }

    /// Counters for `resource`, if it has been seen.
    pub fn snapshot(&self, resource: &str) -> Option<WindowSnapshot> {
        let node = {
            let nodes = self.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            nodes.get(resource).cloned()
        }?;
        Some(node.snapshot(resource, self.now_millis()))
    }

    /// Counters for every tracked resource, sorted by resource.
    pub fn snapshots(&self) -> Vec<WindowSnapshot> {
        let now = self.now_millis();
        let nodes: Vec<(String, Arc<ResourceNode>)> = {
            let nodes = self.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            nodes.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let mut out: Vec<WindowSnapshot> =
            nodes.iter().map(|(resource, node)| node.snapshot(resource, now)).collect();
        out.sort_by(|a, b| a.resource.cmp(&b.resource));
        out
    }

    /// Number of tracked resources.
    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// Whether no resource has been tracked yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop windows untouched for at least `idle_ms` that have no request in
    /// flight. Returns how many were removed.
    ///
    /// A window that has not expired yet is never dropped, whatever `idle_ms`
    /// is: its admitted count still bounds the rest of the window.
    pub fn sweep_idle(&self, idle_ms: u64) -> usize {
        let now = self.now_millis();
        let mut nodes = self.nodes.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = nodes.len();
        nodes.retain(|_, node| {
            node.in_flight.load(Ordering::Acquire) > 0
                || now.saturating_sub(node.last_touched.load(Ordering::Relaxed)) < idle_ms
                || node.window_open(now)
        });
        let removed = before - nodes.len();
        if removed > 0 {
            debug!(target: "flowgate::statistic", removed, remaining = nodes.len(), "idle windows swept");
        }
        removed
    }
}
