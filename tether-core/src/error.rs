//! Error types for the reactive engine.
//!
//! Only configuration and serialization failures are returned through
//! `Result`. Everything raised while a flush is in progress is reported
//! through the runtime's warning channel instead, so that one failing
//! consumer never interrupts a cascade.

use thiserror::Error;

use crate::reactive::ConsumerId;

/// Errors produced by the reactive runtime and the binding layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A consumer kept re-triggering itself past the configured cap.
    ///
    /// The consumer is deactivated when this is reported.
    #[error("consumer {consumer} exceeded {limit} re-runs without settling")]
    Cycle { consumer: ConsumerId, limit: usize },

    /// A selector matched no elements at bind time.
    ///
    /// The binding stays dormant and is retried on the next cleanup pass.
    #[error("selector `{selector}` matched no elements; binding is dormant")]
    BindingTargetMissing { selector: String },

    /// Applying a bound value to an element property failed.
    #[error("cannot apply value to `{property}`: {reason}")]
    ApplyValue { property: String, reason: String },

    /// A user callback returned an error.
    #[error("consumer {consumer} failed: {message}")]
    Callback { consumer: ConsumerId, message: String },

    /// A consumer failed too many times in a row and was deactivated.
    #[error("consumer {consumer} deactivated after {failures} consecutive failures")]
    RepeatedFailure { consumer: ConsumerId, failures: u32 },

    /// A computed value read itself while it was being computed.
    #[error("computed {consumer} read itself while computing")]
    ComputedSelfRead { consumer: ConsumerId },

    /// Converting between Rust values and state failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The runtime configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ReactiveError {
    /// Whether the error deactivated the consumer it concerns.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReactiveError::Cycle { .. } | ReactiveError::RepeatedFailure { .. }
        )
    }
}

impl From<serde_json::Error> for ReactiveError {
    fn from(err: serde_json::Error) -> Self {
        ReactiveError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        let id = ConsumerId::new();
        assert!(ReactiveError::Cycle { consumer: id, limit: 100 }.is_fatal());
        assert!(ReactiveError::RepeatedFailure { consumer: id, failures: 3 }.is_fatal());
        assert!(!ReactiveError::BindingTargetMissing { selector: "#x".into() }.is_fatal());
    }

    #[test]
    fn messages_name_the_subject() {
        let err = ReactiveError::ApplyValue {
            property: "hidden".into(),
            reason: "expected a boolean".into(),
        };
        assert_eq!(
            err.to_string(),
            "cannot apply value to `hidden`: expected a boolean"
        );
    }
}
