//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued and re-run by the
//!    runtime, at once or when the enclosing batch closes.
//!
//! 3. Before re-running, the effect's old subscriptions are dropped and new
//!    ones are recorded during execution.
//!
//! # Differences from Computed
//!
//! - Computed values return a value; effects do not.
//! - Computed values are lazy (compute on access); effects are eager.
//!
//! # Lifetime
//!
//! An effect keeps running until it is disposed or its runtime is dropped.
//! Dropping the [`Effect`] handle does not stop it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::runtime::{Runtime, RuntimeInner};
use super::subscriber::{Callback, CallbackError, ConsumerId, ConsumerKind};

/// Handle to a running effect.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tether_core::reactive::Runtime;
///
/// let rt = Runtime::new();
/// let state = rt.state(json!({"count": 0}));
///
/// let watched = state.clone();
/// let effect = rt.effect(move || {
///     let _ = watched.value("count");
/// });
///
/// state.set("count", 5);
/// assert_eq!(effect.run_count(), 2);
/// effect.dispose();
/// ```
#[derive(Clone)]
pub struct Effect {
    id: ConsumerId,
    runtime: Weak<RuntimeInner>,
    runs: Rc<Cell<usize>>,
}

impl Runtime {
    /// Create an effect and run it once.
    pub fn effect(&self, mut run: impl FnMut() + 'static) -> Effect {
        self.try_effect(move || {
            run();
            Ok::<(), CallbackError>(())
        })
    }

    /// Create an effect whose callback can fail.
    ///
    /// Failures are reported to the warning channel. The effect stays active
    /// unless `max_consecutive_failures` is configured and reached.
    pub fn try_effect<E>(&self, mut run: impl FnMut() -> Result<(), E> + 'static) -> Effect
    where
        E: Into<CallbackError>,
    {
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let callback: Callback = Rc::new(RefCell::new(move || {
            counter.set(counter.get() + 1);
            run().map_err(Into::into)
        }));

        let id = self.inner.register(ConsumerKind::Effect, callback);
        self.inner.run_initial(id);

        Effect {
            id,
            runtime: self.downgrade(),
            runs,
        }
    }
}

impl Effect {
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Stop the effect. It will not run again.
    pub fn dispose(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.destroy(self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        match self.runtime.upgrade() {
            Some(rt) => rt.status(self.id).is_none(),
            None => true,
        }
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.runs.get()
    }

    /// Get the number of locations the effect read on its last run.
    pub fn dependency_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |rt| Runtime::from_inner(rt).dependency_count(self.id))
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use serde_json::json;

    #[test]
    fn effect_runs_on_creation() {
        let rt = Runtime::new();
        let effect = rt.effect(|| {});
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.dependency_count(), 0);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let rt = Runtime::new();
        let state = rt.state(json!({"count": 0, "other": 0}));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (watched, log) = (state.clone(), seen.clone());
        let effect = rt.effect(move || log.borrow_mut().push(watched.value("count")));

        state.set("count", 1);
        state.set("other", 1);
        assert_eq!(*seen.borrow(), vec![json!(0), json!(1)]);
        assert_eq!(effect.run_count(), 2);
        assert_eq!(effect.dependency_count(), 1);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let rt = Runtime::new();
        let state = rt.state(json!({"count": 0}));
        let watched = state.clone();
        let effect = rt.effect(move || {
            watched.get("count");
        });

        effect.dispose();
        assert!(effect.is_disposed());
        state.set("count", 1);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(rt.subscriber_count(state.id()), 0);
    }

    #[test]
    fn dropping_the_handle_keeps_the_effect() {
        let rt = Runtime::new();
        let state = rt.state(json!({"count": 0}));
        let runs = Rc::new(Cell::new(0));

        let (watched, counter) = (state.clone(), runs.clone());
        drop(rt.effect(move || {
            watched.get("count");
            counter.set(counter.get() + 1);
        }));

        state.set("count", 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn failing_effect_reports_and_stays_alive() {
        let rt = Runtime::new();
        let state = rt.state(json!({"n": 0}));
        let watched = state.clone();
        let effect = rt.try_effect(move || {
            if watched.value("n") == json!(1) {
                Err("odd")
            } else {
                Ok(())
            }
        });

        state.set("n", 1);
        state.set("n", 2);
        assert!(!effect.is_disposed());
        assert_eq!(effect.run_count(), 3);
        assert!(matches!(
            rt.take_diagnostics().as_slice(),
            [ReactiveError::Callback { .. }]
        ));
    }
}
