//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computed Values Work
//!
//! 1. On first access, the computed runs its computation and caches the
//!    result.
//!
//! 2. When a dependency changes, the runtime marks the computed dirty. The
//!    computation does not run.
//!
//! 3. On the next access a dirty computed recomputes, capturing fresh
//!    dependencies. Otherwise the cached value is returned.
//!
//! A computed that changes N times between reads therefore recomputes once.
//!
//! Reading a computed from an effect subscribes the effect to it: when the
//! computed turns dirty, its readers are notified.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use super::runtime::{Runtime, RuntimeInner};
use super::subscriber::{Callback, CallbackError, ConsumerId, ConsumerKind, RunState};
use crate::error::ReactiveError;
use crate::graph::DependencyKey;

/// A cached derived value that recomputes only when dependencies change.
///
/// Cloning yields another handle to the same cache. The computation is
/// released when the last handle is dropped.
pub struct Computed<T: Clone + 'static> {
    inner: Rc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    id: ConsumerId,
    runtime: Weak<RuntimeInner>,
    value: Rc<RefCell<Option<T>>>,
    compute: Rc<dyn Fn() -> T>,
}

impl Runtime {
    /// Create a computed value. Nothing runs until the first read.
    pub fn computed<T: Clone + 'static>(&self, compute: impl Fn() -> T + 'static) -> Computed<T> {
        let compute: Rc<dyn Fn() -> T> = Rc::new(compute);
        let value = Rc::new(RefCell::new(None));

        let (slot, f) = (Rc::clone(&value), Rc::clone(&compute));
        let callback: Callback = Rc::new(RefCell::new(move || {
            let next = f();
            *slot.borrow_mut() = Some(next);
            Ok::<(), CallbackError>(())
        }));
        let id = self.inner.register(ConsumerKind::Computed, callback);

        Computed {
            inner: Rc::new(ComputedInner {
                id,
                runtime: self.downgrade(),
                value,
                compute,
            }),
        }
    }
}

impl<T: Clone + 'static> Computed<T> {
    pub fn id(&self) -> ConsumerId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the computation reads its own value.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the current value, or an error if the computed is reading itself.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        let inner = &self.inner;
        let Some(rt) = inner.runtime.upgrade() else {
            return Ok((inner.compute)());
        };

        match rt.status(inner.id) {
            Some((RunState::Running | RunState::Queued, _)) => {
                return Err(ReactiveError::ComputedSelfRead { consumer: inner.id });
            }
            Some((RunState::Idle, dirty)) => {
                if dirty || inner.value.borrow().is_none() {
                    rt.run_consumer(inner.id);
                }
            }
            // Deactivated: keep working, just without caching.
            None => return Ok(rt.untrack(|| (inner.compute)())),
        }

        rt.track(DependencyKey::Computed(inner.id));
        let cached = inner.value.borrow().clone();
        match cached {
            Some(value) => Ok(value),
            None => Ok(rt.untrack(|| (inner.compute)())),
        }
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        match self.inner.runtime.upgrade() {
            Some(rt) => rt.status(self.inner.id).map_or(true, |(_, dirty)| dirty),
            None => true,
        }
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }
}

impl<T: Clone + 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.destroy(self.id);
        }
    }
}

impl<T: Clone + Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("dirty", &self.is_dirty())
            .field("value", &self.inner.value.borrow())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn computed_is_lazy_and_cached() {
        let rt = Runtime::new();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let computed = rt.computed(move || {
            counter.set(counter.get() + 1);
            42
        });

        assert!(!computed.has_value());
        assert_eq!(calls.get(), 0);

        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(calls.get(), 1);
        assert!(!computed.is_dirty());
    }

    #[test]
    fn many_changes_one_recompute() {
        let rt = Runtime::new();
        let state = rt.state(json!({"n": 0}));
        let calls = Rc::new(Cell::new(0));

        let (source, counter) = (state.clone(), calls.clone());
        let doubled = rt.computed(move || {
            counter.set(counter.get() + 1);
            source.value("n").as_i64().unwrap_or(0) * 2
        });
        assert_eq!(doubled.get(), 0);

        for n in 1..=5 {
            state.set("n", n);
        }
        assert!(doubled.is_dirty());
        assert_eq!(calls.get(), 1);

        assert_eq!(doubled.get(), 10);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn effects_follow_computed_values() {
        let rt = Runtime::new();
        let state = rt.state(json!({"n": 1}));
        let source = state.clone();
        let squared = rt.computed(move || {
            let n = source.value("n").as_i64().unwrap_or(0);
            n * n
        });

        let seen = Rc::new(RefCell::new(Vec::new()));
        let (reader, log) = (squared.clone(), seen.clone());
        rt.effect(move || log.borrow_mut().push(reader.get()));

        state.set("n", 3);
        assert_eq!(*seen.borrow(), vec![1, 9]);
    }

    #[test]
    fn self_read_is_an_error() {
        let rt = Runtime::new();
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let result = Rc::new(RefCell::new(None));

        let (me, out) = (slot.clone(), result.clone());
        let computed = rt.computed(move || {
            if let Some(this) = me.borrow().as_ref() {
                *out.borrow_mut() = Some(this.try_get());
            }
            1
        });
        *slot.borrow_mut() = Some(computed.clone());

        assert_eq!(computed.get(), 1);
        assert!(matches!(
            result.borrow().as_ref(),
            Some(Err(ReactiveError::ComputedSelfRead { .. }))
        ));
        slot.borrow_mut().take();
    }

    #[test]
    fn dropping_the_last_handle_releases_the_consumer() {
        let rt = Runtime::new();
        let computed = rt.computed(|| 1);
        let id = computed.id();
        let copy = computed.clone();
        drop(computed);
        assert!(rt.is_active(id));
        drop(copy);
        assert!(!rt.is_active(id));
    }
}
