//! Admission engine: the decision point in front of request handlers.
//!
//! One engine instance is created by the process composition root and cloned
//! into every request-handling task; clones share rules and counters.
//!
//! ```
//! use flowgate::{Admission, AdmissionEngine, Rule};
//!
//! let engine = AdmissionEngine::builder()
//!     .rules(vec![Rule::new("POST:/orders", 1.0)])
//!     .build()
//!     .unwrap();
//!
//! let first = engine.enter("POST:/orders");
//! assert!(first.is_admitted());
//! assert!(engine.enter("POST:/orders").is_blocked());
//! // Unmanaged resources are always admitted.
//! assert!(engine.enter("GET:/health").is_admitted());
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::clock::{Clock, MonotonicClock};
use crate::config::EngineConfig;
use crate::error::{Blocked, ValidationError};
use crate::repository::RuleRepository;
use crate::rule::{Rule, DEFAULT_WINDOW_MS};
use crate::statistic::{ResourceNode, TrafficStatistic, WindowSnapshot};
use crate::telemetry::{AdmissionEvent, EventSink, NullSink};

/// Result of an admission check.
#[derive(Debug)]
pub enum Admission {
    /// The request may proceed. The entry must be released when the work is done
    /// (dropping it releases it too).
    Admitted(Entry),
    /// The request exceeded its quota and must be short-circuited.
    Blocked(Blocked),
}

impl Admission {
    /// Helper to check if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }

    /// Helper to check if blocked.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Admission::Blocked(_))
    }

    /// Convert into a `Result` for `?`-style call sites.
    pub fn into_result(self) -> Result<Entry, Blocked> {
        match self {
            Admission::Admitted(entry) => Ok(entry),
            Admission::Blocked(blocked) => Err(blocked),
        }
    }
}

/// Token for one admitted, in-flight request.
///
/// Entries of governed resources feed the `in_flight` and `completed` gauges;
/// entries of unmanaged resources carry no counters. Releasing is idempotent: [`Entry::exit`] may be called any number of times and
/// only the first call has an effect. An entry that is dropped without an
/// explicit exit is released by `Drop`, so every exit path of the caller
/// (errors, early returns, cancelled futures) releases it exactly once.
pub struct Entry {
    resource: String,
    node: Option<Arc<ResourceNode>>,
    sink: Arc<dyn EventSink>,
    exited: bool,
}

impl Entry {
    /// Resource this entry was admitted for.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Whether the entry has already been released.
    pub fn is_exited(&self) -> bool {
        self.exited
    }

    /// Release the entry. Later calls are no-ops.
    pub fn exit(&mut self) {
        if self.exited {
            return;
        }
        self.exited = true;
        if let Some(node) = &self.node {
            node.exit();
        }
        self.sink.emit(&AdmissionEvent::Exited { resource: self.resource.clone() });
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("resource", &self.resource)
            .field("exited", &self.exited)
            .finish()
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.exit();
    }
}

struct EngineInner {
    rules: RuleRepository,
    stats: TrafficStatistic,
    sink: Arc<dyn EventSink>,
}

/// Shared admission-control engine. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct AdmissionEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for AdmissionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionEngine")
            .field("rules", &self.inner.rules.len())
            .field("tracked_resources", &self.inner.stats.len())
            .field("sink", &self.inner.sink)
            .finish()
    }
}

impl Default for AdmissionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionEngine {
    /// Engine with no rules: every resource is admitted until rules are loaded.
    pub fn new() -> Self {
        Self::from_parts(
            RuleRepository::new(),
            TrafficStatistic::new(),
            Arc::new(NullSink),
        )
    }

    /// Builder for clock, telemetry and initial rules.
    pub fn builder() -> AdmissionEngineBuilder {
        AdmissionEngineBuilder::default()
    }

    /// Build an engine from a validated config.
    pub fn from_config(config: EngineConfig) -> Result<Self, ValidationError> {
        Self::builder().config(config).build()
    }

    fn from_parts(rules: RuleRepository, stats: TrafficStatistic, sink: Arc<dyn EventSink>) -> Self {
        Self { inner: Arc::new(EngineInner { rules, stats, sink }) }
    }

    /// Check the quota of `resource` and admit or block the request.
    ///
    /// Unmanaged resources are always admitted and leave no trace in the
    /// statistic. Blocked requests are never queued or retried; the caller
    /// decides between a fallback and a fail-fast answer.
    pub fn enter(&self, resource: &str) -> Admission {
        let inner = &self.inner;
        let node = match inner.rules.get(resource) {
            None => None,
            Some(rule) => {
                let (node, admitted) =
                    inner.stats.consume_node(resource, rule.threshold, rule.window_ms);
                if !admitted {
                    debug!(
                        target: "flowgate::engine",
                        resource,
                        threshold = rule.threshold,
                        window_ms = rule.window_ms,
                        "request blocked"
                    );
                    inner.sink.emit(&AdmissionEvent::Blocked {
                        resource: resource.to_string(),
                        threshold: rule.threshold,
                    });
                    return Admission::Blocked(Blocked::new(resource, rule));
                }
                node.enter(inner.stats.now_millis());
                Some(node)
            }
        };
        inner.sink.emit(&AdmissionEvent::Admitted { resource: resource.to_string() });
        Admission::Admitted(Entry {
            resource: resource.to_string(),
            node,
            sink: inner.sink.clone(),
            exited: false,
        })
    }

    /// Release an admitted entry. Equivalent to [`Entry::exit`] followed by drop.
    ///
    /// The admission count is not decremented: quotas limit the rate of
    /// admissions per window, not concurrency.
    pub fn exit(&self, mut entry: Entry) {
        entry.exit();
    }

    /// Replace the whole rule set. Invalid input leaves the current rules in place.
    pub fn load_rules(&self, rules: Vec<Rule>) -> Result<(), ValidationError> {
        let count = self.inner.rules.load(rules)?;
        self.inner.sink.emit(&AdmissionEvent::RulesLoaded { count });
        Ok(())
    }

    /// Insert or replace the rule for `resource` with a new threshold.
    ///
    /// Visible to every `enter` that starts after this returns. No authorization
    /// is performed; gate access to this operation at the edge.
    pub fn update_rule(&self, resource: &str, threshold: f64) -> Result<(), ValidationError> {
        let rule = self.inner.rules.upsert(resource, threshold)?;
        self.inner.sink.emit(&AdmissionEvent::RuleUpdated {
            resource: rule.resource,
            threshold: rule.threshold,
        });
        Ok(())
    }

    /// Active rule for `resource`.
    pub fn rule(&self, resource: &str) -> Option<Rule> {
        self.inner.rules.get(resource)
    }

    /// All active rules sorted by resource.
    pub fn rules(&self) -> Vec<Rule> {
        self.inner.rules.rules()
    }

    /// Counters for `resource`, if it is governed and has seen traffic.
    pub fn stats(&self, resource: &str) -> Option<WindowSnapshot> {
        self.inner.stats.snapshot(resource)
    }

    /// Counters for every resource that has seen traffic.
    pub fn all_stats(&self) -> Vec<WindowSnapshot> {
        self.inner.stats.snapshots()
    }

    /// Forget idle resource windows; see [`TrafficStatistic::sweep_idle`].
    pub fn sweep_idle(&self, idle_ms: u64) -> usize {
        self.inner.stats.sweep_idle(idle_ms)
    }
}

/// Builder for [`AdmissionEngine`].
#[derive(Debug)]
pub struct AdmissionEngineBuilder {
    clock: Option<Arc<dyn Clock>>,
    sink: Arc<dyn EventSink>,
    default_window_ms: u64,
    rules: Vec<Rule>,
}

impl Default for AdmissionEngineBuilder {
    fn default() -> Self {
        Self {
            clock: None,
            sink: Arc::new(NullSink),
            default_window_ms: DEFAULT_WINDOW_MS,
            rules: Vec::new(),
        }
    }
}

impl AdmissionEngineBuilder {
    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Telemetry sink receiving every admission event.
    pub fn sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Window used for rules created through [`AdmissionEngine::update_rule`].
    pub fn default_window_ms(mut self, window_ms: u64) -> Self {
        self.default_window_ms = window_ms;
        self
    }

    /// Initial rule set.
    pub fn rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    /// Take default window and rules from a config.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.default_window_ms = config.default_window_ms;
        self.rules = config.rules;
        self
    }

    /// Validate settings and build the engine.
    pub fn build(self) -> Result<AdmissionEngine, ValidationError> {
        if self.default_window_ms == 0 {
            return Err(ValidationError::InvalidWindow {
                resource: "<default>".into(),
                provided: 0,
            });
        }
        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::default()));
        let engine = AdmissionEngine::from_parts(
            RuleRepository::with_default_window(self.default_window_ms),
            TrafficStatistic::with_clock(clock),
            self.sink,
        );
        engine.load_rules(self.rules)?;
        Ok(engine)
    }
}
