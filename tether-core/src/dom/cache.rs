//! Memoized element lookup.
//!
//! Query results are cached per selector as weak references and dropped
//! whenever the document reports a structural change. Create the cache
//! before any [`Binder`](super::Binder) observing the same document, so its
//! invalidation runs first within each batch.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use super::{Document, Element, ElementResolver, MutationFeed, MutationRecord, WeakElement};

pub struct ElementCache {
    document: Document,
    entries: Rc<RefCell<HashMap<String, Vec<WeakElement>>>>,
    hits: Cell<usize>,
    misses: Cell<usize>,
}

impl ElementCache {
    pub fn new(document: &Document) -> Self {
        let entries: Rc<RefCell<HashMap<String, Vec<WeakElement>>>> = Rc::default();
        let weak = Rc::downgrade(&entries);
        document.observe(Rc::new(move |records: &[MutationRecord]| {
            if let Some(entries) = weak.upgrade() {
                trace!(records = records.len(), "element cache invalidated");
                entries.borrow_mut().clear();
            }
        }));

        Self {
            document: document.clone(),
            entries,
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Forget every cached selector.
    pub fn invalidate(&self) {
        self.entries.borrow_mut().clear();
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (usize, usize) {
        (self.hits.get(), self.misses.get())
    }

    fn cached(&self, selector: &str) -> Option<Vec<Element>> {
        let entries = self.entries.borrow();
        let weak = entries.get(selector)?;
        let elements: Vec<Element> = weak.iter().filter_map(WeakElement::upgrade).collect();
        let fresh = elements.len() == weak.len() && elements.iter().all(Element::is_connected);
        fresh.then_some(elements)
    }
}

impl ElementResolver for ElementCache {
    fn resolve(&self, selector: &str) -> Vec<Element> {
        if let Some(elements) = self.cached(selector) {
            self.hits.set(self.hits.get() + 1);
            return elements;
        }
        self.misses.set(self.misses.get() + 1);

        let elements = self.document.query_all(selector);
        // Misses are not cached: the element may show up later.
        if !elements.is_empty() {
            self.entries.borrow_mut().insert(
                selector.to_owned(),
                elements.iter().map(Element::downgrade).collect(),
            );
        }
        elements
    }
}

impl std::fmt::Debug for ElementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementCache")
            .field("selectors", &self.entries.borrow().len())
            .field("hits", &self.hits.get())
            .field("misses", &self.misses.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lookups_hit_the_cache() {
        let doc = Document::new();
        let el = doc.create_element("span");
        el.set_id(Some("name"));
        doc.body().append_child(&el);

        let cache = ElementCache::new(&doc);
        assert!(cache.resolve("#name")[0].ptr_eq(&el));
        assert!(cache.resolve("#name")[0].ptr_eq(&el));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn mutations_invalidate() {
        let doc = Document::new();
        let cache = ElementCache::new(&doc);
        let el = doc.create_element("span");
        el.add_class("x");
        doc.body().append_child(&el);
        assert_eq!(cache.resolve(".x").len(), 1);

        let other = doc.create_element("span");
        other.add_class("x");
        doc.body().append_child(&other);
        doc.flush_mutations();
        assert_eq!(cache.resolve(".x").len(), 2);
        assert_eq!(cache.stats(), (0, 2));
    }

    #[test]
    fn detached_entries_are_not_served() {
        let doc = Document::new();
        let cache = ElementCache::new(&doc);
        let el = doc.create_element("p");
        el.set_id(Some("p"));
        doc.body().append_child(&el);
        assert_eq!(cache.resolve("#p").len(), 1);

        // Not flushed yet, but the stale entry is still rejected.
        el.remove();
        assert!(cache.resolve("#p").is_empty());
    }
}
