//! Reactive Primitives
//!
//! This module implements the core reactive system: observed state, computed
//! values and effects. These primitives form the foundation of Tether's
//! fine-grained reactivity.
//!
//! # Concepts
//!
//! ## State
//!
//! A [`State`] wraps a plain JSON object or array. When a property is read
//! within a tracking context (such as a computed or effect), the running
//! consumer is registered as a dependent of that property. When the property
//! changes, all dependents are notified.
//!
//! ## Computed
//!
//! A [`Computed`] is a derived value that caches its result. It re-evaluates
//! only when it is read after one of its dependencies changed.
//!
//! ## Effects
//!
//! An [`Effect`] is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems, such as the DOM.
//!
//! # Implementation Notes
//!
//! Each [`Runtime`] owns its own recording stack. When state is read, the
//! runtime checks whether a consumer is recording and, if so, registers the
//! dependency. Runtimes share nothing, so several can coexist in one thread.

mod array;
mod context;
mod effect;
mod execute;
mod memo;
mod runtime;
mod state;
mod subscriber;
mod watch;

pub use context::{ContextStack, ReactiveContext};
pub use effect::Effect;
pub use execute::{execute, execute_with_timeout, ExecuteError};
pub use memo::Computed;
pub use runtime::Runtime;
pub use state::{is_reactive, to_raw, Entry, State, WeakState, MAX_INDEX_GAP, PRIMITIVE_KEY};
pub use subscriber::{CallbackError, ConsumerId, ConsumerKind, RunState};

pub(crate) use subscriber::Callback;
