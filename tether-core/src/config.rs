//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration.

use serde::Deserialize;

use crate::error::ReactiveError;

/// Default cap on consecutive re-runs of a single consumer.
pub const DEFAULT_MAX_RERUN_CHAIN: usize = 100;

/// Default number of diagnostics retained for [`Runtime::take_diagnostics`].
///
/// [`Runtime::take_diagnostics`]: crate::reactive::Runtime::take_diagnostics
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 64;

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReactiveConfig {
    /// How many times a consumer may be re-triggered without settling
    /// before it is deactivated with a cycle error.
    pub max_rerun_chain: usize,

    /// Deactivate a consumer after this many consecutive callback failures.
    /// `None` keeps failing consumers alive indefinitely.
    pub max_consecutive_failures: Option<u32>,

    /// Number of diagnostics kept in memory; the oldest are dropped first.
    pub diagnostics_capacity: usize,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            max_rerun_chain: DEFAULT_MAX_RERUN_CHAIN,
            max_consecutive_failures: None,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

impl ReactiveConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(source: &str) -> Result<Self, ReactiveError> {
        let config: Self =
            serde_json::from_str(source).map_err(|e| ReactiveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), ReactiveError> {
        if self.max_rerun_chain == 0 {
            return Err(ReactiveError::Config(
                "max_rerun_chain must be at least 1".into(),
            ));
        }
        if self.max_consecutive_failures == Some(0) {
            return Err(ReactiveError::Config(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = ReactiveConfig::from_json("{}").unwrap();
        assert_eq!(config, ReactiveConfig::default());
        assert_eq!(config.max_rerun_chain, 100);
    }

    #[test]
    fn partial_override() {
        let config =
            ReactiveConfig::from_json(r#"{"max_rerun_chain": 5, "max_consecutive_failures": 3}"#)
                .unwrap();
        assert_eq!(config.max_rerun_chain, 5);
        assert_eq!(config.max_consecutive_failures, Some(3));
        assert_eq!(config.diagnostics_capacity, DEFAULT_DIAGNOSTICS_CAPACITY);
    }

    #[test]
    fn rejects_zero_cap_and_unknown_fields() {
        assert!(matches!(
            ReactiveConfig::from_json(r#"{"max_rerun_chain": 0}"#),
            Err(ReactiveError::Config(_))
        ));
        assert!(ReactiveConfig::from_json(r#"{"rerun": 1}"#).is_err());
    }
}
