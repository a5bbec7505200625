//! Static engine configuration.
//!
//! Rules loaded at start-up come from here; anything changed afterwards through
//! the administration API lives only in memory and reverts to this set on
//! restart.

use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::error::ValidationError;
use crate::presets;
use crate::rule::{Rule, DEFAULT_WINDOW_MS};

/// Errors produced while reading a config document.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The document is not valid JSON for [`EngineConfig`].
    #[error("malformed engine config: {0}")]
    Parse(#[from] serde_json::Error),
    /// The document parsed but contains an unusable rule.
    #[error("invalid engine config: {0}")]
    Invalid(#[from] ValidationError),
}

/// Engine settings and the initial rule set.
///
/// ```
/// use flowgate::config::EngineConfig;
/// let cfg = EngineConfig::from_json_str(
///     r#"{ "rules": [ { "resource": "POST:/orders", "threshold": 5 } ] }"#,
/// ).unwrap();
/// assert_eq!(cfg.default_window_ms, 1000);
/// assert_eq!(cfg.rules[0].window_ms, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Window for rules created at runtime without an existing rule.
    #[serde(default = "default_window_ms")]
    pub default_window_ms: u64,
    /// Rules active at start-up.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

impl Default for EngineConfig {
    /// The static default rule set ([`presets::default_rules`]).
    fn default() -> Self {
        Self { default_window_ms: DEFAULT_WINDOW_MS, rules: presets::default_rules() }
    }
}

impl EngineConfig {
    /// Config with no rules.
    pub fn empty() -> Self {
        Self { default_window_ms: DEFAULT_WINDOW_MS, rules: Vec::new() }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a JSON document from a reader (e.g. a file).
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = serde_json::from_reader(reader)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the default window and every rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_window_ms == 0 {
            return Err(ValidationError::InvalidWindow {
                resource: "<default>".into(),
                provided: 0,
            });
        }
        self.rules.iter().try_for_each(Rule::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_carries_default_rules() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.rules, presets::default_rules());
    }

    #[test]
    fn reader_and_str_agree() {
        let raw = r#"{"default_window_ms":500,"rules":[{"resource":"GET:/products","threshold":200}]}"#;
        let a = EngineConfig::from_json_str(raw).unwrap();
        let b = EngineConfig::from_reader(raw.as_bytes()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.default_window_ms, 500);
    }

    #[test]
    fn rejects_invalid_rules_and_bad_json() {
        let err = EngineConfig::from_json_str(r#"{"rules":[{"resource":"x","threshold":-1}]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ValidationError::InvalidThreshold { .. })));

        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = EngineConfig::from_json_str(r#"{"default_window_ms":0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ValidationError::InvalidWindow { .. })));
    }
}
