//! Resource-keyed rule repository.
//!
//! The active rule set is an immutable map swapped as a whole through
//! [`DynamicConfig`]. Lookups never take a lock and never observe a partially
//! applied change; every mutation (bulk load or single upsert) installs a new map
//! with one compare-and-swap.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::adaptive::DynamicConfig;
use crate::error::ValidationError;
use crate::rule::{self, Rule, DEFAULT_WINDOW_MS};

type RuleSet = HashMap<String, Rule>;

/// Holds at most one active [`Rule`] per resource.
#[derive(Clone, Debug)]
pub struct RuleRepository {
    rules: DynamicConfig<RuleSet>,
    default_window_ms: u64,
}

impl Default for RuleRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleRepository {
    /// Empty repository; upserts of unknown resources use a 1000ms window.
    pub fn new() -> Self {
        Self::with_default_window(DEFAULT_WINDOW_MS)
    }

    /// Empty repository using `window_ms` for rules created by [`upsert`](Self::upsert).
    pub fn with_default_window(window_ms: u64) -> Self {
        Self { rules: DynamicConfig::new(RuleSet::new()), default_window_ms: window_ms }
    }

    /// Replace the entire active rule set.
    ///
    /// Every rule is validated first; on the first invalid rule nothing is
    /// changed. When the same resource appears twice, the later rule wins.
    pub fn load(&self, rules: Vec<Rule>) -> Result<usize, ValidationError> {
        let mut next = RuleSet::with_capacity(rules.len());
        for rule in rules {
            rule.validate()?;
            if let Some(prev) = next.insert(rule.resource.clone(), rule) {
                warn!(
                    target: "flowgate::repository",
                    resource = %prev.resource,
                    "duplicate rule in load; last one wins"
                );
            }
        }
        let count = next.len();
        self.rules.set(next);
        info!(target: "flowgate::repository", count, "flow rules loaded");
        Ok(count)
    }

    /// Active rule for `resource`, if managed.
    pub fn get(&self, resource: &str) -> Option<Rule> {
        self.rules.get().get(resource).cloned()
    }

    /// Replace the threshold of the rule for `resource`, or insert a new
    /// direct/reject rule with the default window when none exists.
    ///
    /// Runs as a single compare-and-swap over the whole set, so concurrent upserts
    /// on different resources never lose one another's change.
    pub fn upsert(&self, resource: &str, threshold: f64) -> Result<Rule, ValidationError> {
        rule::validate_resource(resource)?;
        rule::validate_threshold(resource, threshold)?;
        let window_ms = self.default_window_ms;
        let installed = self.rules.try_update(|current| {
            let mut next = current.clone();
            let updated = match current.get(resource) {
                Some(existing) => Rule { threshold, ..existing.clone() },
                None => Rule::new(resource, threshold).with_window_ms(window_ms),
            };
            updated.validate()?;
            next.insert(resource.to_string(), updated);
            Ok::<_, ValidationError>(next)
        })?;
        let rule = installed.get(resource).cloned().ok_or(ValidationError::EmptyResource)?;
        info!(
            target: "flowgate::repository",
            resource = %rule.resource,
            threshold = rule.threshold,
            window_ms = rule.window_ms,
            "flow rule upserted"
        );
        Ok(rule)
    }

    /// Snapshot of all active rules sorted by resource.
    pub fn rules(&self) -> Vec<Rule> {
        let snapshot: Arc<RuleSet> = self.rules.get();
        let mut rules: Vec<Rule> = snapshot.values().cloned().collect();
        rules.sort_by(|a, b| a.resource.cmp(&b.resource));
        rules
    }

    /// Number of active rules.
    pub fn len(&self) -> usize {
        self.rules.get().len()
    }

    /// Whether no rules are active.
    pub fn is_empty(&self) -> bool {
        self.rules.get().is_empty()
    }
}
