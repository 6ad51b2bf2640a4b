//! DOM Binding
//!
//! This module connects reactive state to element properties.
//!
//! # Overview
//!
//! - [`Binder`] turns value functions into binding consumers that write into
//!   elements whenever the state they read changes.
//! - [`ElementResolver`] and [`MutationFeed`] are the two things the binder
//!   needs from its surroundings: a way to find elements by selector, and a
//!   stream of structural changes to clean up after.
//! - [`Document`] and [`ElementCache`] implement both for an in-memory tree.
//!
//! Bindings only hold weak references to their elements. An element that
//! leaves the document is released once the next batch of mutation records
//! has been processed.

mod apply;
mod binding;
mod cache;
mod document;

use std::rc::Rc;

pub use apply::{apply_value, BOOLEAN_PROPERTIES};
pub use binding::{Binder, BindingHandle, Bindings, ValueFn};
pub use cache::ElementCache;
pub use document::{Document, Element, MutationRecord, WeakElement};

/// Callback receiving one batch of mutation records.
pub type MutationObserver = Rc<dyn Fn(&[MutationRecord])>;

/// Finds elements for a selector.
pub trait ElementResolver {
    /// All connected elements matching `selector`; empty if none.
    fn resolve(&self, selector: &str) -> Vec<Element>;
}

/// Source of structural change notifications.
pub trait MutationFeed {
    /// Register `observer` for every future batch of records.
    fn observe(&self, observer: MutationObserver);
}

impl ElementResolver for Document {
    fn resolve(&self, selector: &str) -> Vec<Element> {
        self.query_all(selector)
    }
}
