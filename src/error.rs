//! Error types for admission control
use std::fmt;

use crate::rule::Rule;

/// Malformed rule input. Returned synchronously by rule loads and updates; the
/// active rule set is left untouched.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The resource identifier was empty or whitespace.
    #[error("resource identifier must not be empty")]
    EmptyResource,
    /// Threshold was zero, negative, NaN or infinite.
    #[error("threshold for '{resource}' must be a finite number > 0 (got {provided})")]
    InvalidThreshold {
        /// Resource the rule was meant for.
        resource: String,
        /// Value provided by caller.
        provided: f64,
    },
    /// Window length was zero.
    #[error("window for '{resource}' must be > 0ms (got {provided})")]
    InvalidWindow {
        /// Resource the rule was meant for.
        resource: String,
        /// Value provided by caller.
        provided: u64,
    },
}

/// Outcome of a denied admission check.
///
/// Not a failure of the engine: the request simply exceeded the quota of its
/// resource. It implements `Error` so middleware can surface it.
#[derive(Debug, Clone, PartialEq)]
pub struct Blocked {
    resource: String,
    rule: Rule,
}

impl Blocked {
    pub(crate) fn new(resource: impl Into<String>, rule: Rule) -> Self {
        Self { resource: resource.into(), rule }
    }

    /// Resource identifier that was denied.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Rule that was in force when the request was denied.
    pub fn rule(&self) -> &Rule {
        &self.rule
    }
}

impl fmt::Display for Blocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request to '{}' blocked by flow rule ({} per {}ms)",
            self.resource, self.rule.threshold, self.rule.window_ms
        )
    }
}

impl std::error::Error for Blocked {}

/// Error returned by the admission middleware.
#[derive(Debug, Clone)]
pub enum AdmissionError<E> {
    /// The request exceeded its resource quota and no fallback was configured.
    Blocked(Blocked),
    /// The underlying service failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked(blocked) => write!(f, "{}", blocked),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Blocked(b) => Some(b),
        }
    }
}

impl<E> AdmissionError<E> {
    /// Check if the request was denied by a flow rule
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Access the block details if present.
    pub fn blocked(&self) -> Option<&Blocked> {
        match self {
            Self::Blocked(b) => Some(b),
            _ => None,
        }
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<Blocked> for AdmissionError<E> {
    fn from(blocked: Blocked) -> Self {
        Self::Blocked(blocked)
    }
}
