//! Consumer types for the reactive system.
//!
//! A consumer is any computation that depends on reactive values: effects,
//! DOM bindings and computed values.

use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a consumer.
///
/// IDs grow monotonically, so ordering by ID is ordering by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(u64);

impl ConsumerId {
    /// Generate a new unique consumer ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a consumer does with its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerKind {
    /// Arbitrary side effect. Eager: re-runs when a dependency changes.
    Effect,
    /// Writes a value into a DOM element property. Eager.
    Binding,
    /// Caches a derived value. Lazy: only marked dirty on change.
    Computed,
}

impl ConsumerKind {
    /// Eager consumers are scheduled on notification, lazy ones are not.
    pub fn is_eager(&self) -> bool {
        !matches!(self, ConsumerKind::Computed)
    }
}

/// Position of a consumer in its run cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    /// Re-triggered while running; runs again once the current run returns.
    Queued,
}

/// Error type user callbacks may return.
pub type CallbackError = Box<dyn Error + 'static>;

pub(crate) type Callback = Rc<RefCell<dyn FnMut() -> Result<(), CallbackError>>>;

/// Registry entry for a consumer.
///
/// A consumer is active exactly as long as its record is registered.
pub(crate) struct ConsumerRecord {
    pub(crate) kind: ConsumerKind,
    pub(crate) callback: Callback,
    pub(crate) state: RunState,
    /// Computed only: the cached value is stale.
    pub(crate) dirty: bool,
    /// Consecutive failed runs.
    pub(crate) failures: u32,
}

impl ConsumerRecord {
    pub(crate) fn new(kind: ConsumerKind, callback: Callback) -> Self {
        Self {
            kind,
            callback,
            state: RunState::Idle,
            dirty: kind == ConsumerKind::Computed,
            failures: 0,
        }
    }
}
