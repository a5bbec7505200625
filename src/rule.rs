//! Flow rules: the quota attached to one resource.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Window length used when a rule is created without an explicit one.
pub const DEFAULT_WINDOW_MS: u64 = 1000;

/// How quota consumption is computed for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStrategy {
    /// One request consumes one unit.
    #[default]
    Direct,
}

/// What happens once the quota of a window is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlBehavior {
    /// Fail fast: the request is blocked immediately.
    #[default]
    Reject,
}

/// Quota for a single resource.
///
/// A rule is a value: it is never patched in place. Updating a quota means
/// installing a new rule for the same resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Resource identifier the rule governs.
    pub resource: String,
    /// Token calculation strategy.
    #[serde(default)]
    pub strategy: TokenStrategy,
    /// Behaviour once the window is exhausted.
    #[serde(default)]
    pub behavior: ControlBehavior,
    /// Maximum number of admitted units per window.
    pub threshold: f64,
    /// Window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

impl Rule {
    /// Direct/reject rule with the default window.
    ///
    /// ```
    /// use flowgate::Rule;
    /// let rule = Rule::new("POST:/orders", 5.0);
    /// assert_eq!(rule.window_ms, 1000);
    /// ```
    pub fn new(resource: impl Into<String>, threshold: f64) -> Self {
        Self {
            resource: resource.into(),
            strategy: TokenStrategy::Direct,
            behavior: ControlBehavior::Reject,
            threshold,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }

    /// Override the statistic window.
    pub fn with_window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    /// Check the rule is usable by the engine.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_resource(&self.resource)?;
        validate_threshold(&self.resource, self.threshold)?;
        if self.window_ms == 0 {
            return Err(ValidationError::InvalidWindow {
                resource: self.resource.clone(),
                provided: self.window_ms,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <= {} per {}ms", self.resource, self.threshold, self.window_ms)
    }
}

pub(crate) fn validate_resource(resource: &str) -> Result<(), ValidationError> {
    if resource.trim().is_empty() {
        return Err(ValidationError::EmptyResource);
    }
    Ok(())
}

pub(crate) fn validate_threshold(resource: &str, threshold: f64) -> Result<(), ValidationError> {
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(ValidationError::InvalidThreshold {
            resource: resource.to_string(),
            provided: threshold,
        });
    }
    Ok(())
}
