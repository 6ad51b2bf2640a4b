//! Tether Core
//!
//! This crate provides the runtime for the Tether reactive state engine.
//! It implements:
//!
//! - Observed state over plain JSON objects and arrays
//! - Computed values, effects and watchers with automatic dependency tracking
//! - Batched, coalesced re-execution
//! - Bindings that keep element properties in sync with state
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: the runtime, state containers and consumers
//! - `graph`: dependency keys, subscription tables and the update queue
//! - `dom`: the binding layer and an in-memory document to bind against
//! - `config`, `error`: runtime settings and the error taxonomy
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use serde_json::json;
//! use tether_core::dom::{Binder, Bindings, Document, ElementCache};
//! use tether_core::reactive::Runtime;
//!
//! let rt = Runtime::new();
//! let doc = Document::new();
//! let label = doc.create_element("span");
//! label.set_id(Some("count"));
//! doc.body().append_child(&label);
//!
//! let cache = Rc::new(ElementCache::new(&doc));
//! let binder = Binder::new(&rt, cache, &doc);
//!
//! let state = rt.state(json!({"count": 0}));
//! let source = state.clone();
//! let _handle = binder.bind(Bindings::new().text("#count", move || source.value("count")));
//!
//! state.set("count", 5);
//! assert_eq!(label.text(), "5");
//! ```

pub mod config;
pub mod dom;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::ReactiveConfig;
pub use error::ReactiveError;
pub use reactive::{Computed, Effect, Entry, Runtime, State};
