//! Telemetry for admission decisions.
//!
//! The engine reports every decision and rule change as an [`AdmissionEvent`]
//! to an [`EventSink`]. Sinks are called inline on the request path, so they
//! must be cheap and must never fail the caller: a sink that cannot keep up
//! drops events.
//!
//! ```rust
//! use flowgate::telemetry::{AdmissionEvent, EventSink, MemorySink};
//!
//! let sink = MemorySink::with_capacity(2);
//! sink.emit(&AdmissionEvent::Admitted { resource: "GET:/health".into() });
//! assert_eq!(sink.len(), 1);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Events emitted by the admission engine.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionEvent {
    /// A request was admitted.
    Admitted {
        /// Resource identifier.
        resource: String,
    },
    /// A request was denied by its flow rule.
    Blocked {
        /// Resource identifier.
        resource: String,
        /// Threshold in force at the time.
        threshold: f64,
    },
    /// An admitted request released its entry.
    Exited {
        /// Resource identifier.
        resource: String,
    },
    /// The whole rule set was replaced.
    RulesLoaded {
        /// Number of active rules after the load.
        count: usize,
    },
    /// A single rule was inserted or replaced.
    RuleUpdated {
        /// Resource identifier.
        resource: String,
        /// New threshold.
        threshold: f64,
    },
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Admitted { resource } => write!(f, "Admitted({})", resource),
            AdmissionEvent::Blocked { resource, threshold } => {
                write!(f, "Blocked({}, threshold={})", resource, threshold)
            }
            AdmissionEvent::Exited { resource } => write!(f, "Exited({})", resource),
            AdmissionEvent::RulesLoaded { count } => write!(f, "RulesLoaded(count={})", count),
            AdmissionEvent::RuleUpdated { resource, threshold } => {
                write!(f, "RuleUpdated({}, threshold={})", resource, threshold)
            }
        }
    }
}

/// Consumer of admission events.
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Record an event. Must not block for long or panic.
    fn emit(&self, event: &AdmissionEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: &AdmissionEvent) {
        (**self).emit(event)
    }
}

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &AdmissionEvent) {}
}

/// A telemetry sink that logs events using the `tracing` crate.
///
/// Blocked requests log at DEBUG (they are expected under load), rule changes
/// at INFO, everything else at TRACE.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &AdmissionEvent) {
        match event {
            AdmissionEvent::Blocked { .. } => {
                tracing::debug!(target: "flowgate::telemetry", event = %event, "admission_event")
            }
            AdmissionEvent::RulesLoaded { .. } | AdmissionEvent::RuleUpdated { .. } => {
                tracing::info!(target: "flowgate::telemetry", event = %event, "admission_event")
            }
            _ => tracing::trace!(target: "flowgate::telemetry", event = %event, "admission_event"),
        }
    }
}

/// A telemetry sink that stores events in memory.
///
/// Useful for testing and debugging. Bounded: the oldest events are evicted once
/// capacity is exceeded.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<AdmissionEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Creates a bounded memory sink (default cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Creates a bounded memory sink with explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AdmissionEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of stored events, oldest first.
    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Drop all stored events.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no events are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events evicted because capacity was exceeded.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &AdmissionEvent) {
        if self.capacity == 0 {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut events = self.lock();
        if events.len() >= self.capacity {
            events.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_evicts_oldest() {
        let sink = MemorySink::with_capacity(2);
        for i in 0..3 {
            sink.emit(&AdmissionEvent::Admitted { resource: format!("r{i}") });
        }
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(sink.events()[0], AdmissionEvent::Admitted { resource: "r1".into() });
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn zero_capacity_counts_everything_as_evicted() {
        let sink = MemorySink::with_capacity(0);
        sink.emit(&AdmissionEvent::RulesLoaded { count: 1 });
        assert!(sink.is_empty());
        assert_eq!(sink.evicted(), 1);
    }

    #[test]
    fn display_is_compact() {
        let ev = AdmissionEvent::Blocked { resource: "POST:/orders".into(), threshold: 5.0 };
        assert_eq!(ev.to_string(), "Blocked(POST:/orders, threshold=5)");
    }
}
