//! Binding Layer
//!
//! A binding is a consumer that evaluates a value function and writes the
//! result into one property of one element. Bindings are eager: the runtime
//! re-runs them as soon as (or, inside a batch, once) the state they read
//! changes.
//!
//! # Lifecycle
//!
//! 1. `bind` resolves each selector. Every matching element gets one binding
//!    consumer per property. A selector without matches is reported and kept
//!    dormant.
//!
//! 2. On every batch of mutation records the binder runs a cleanup pass:
//!    bindings whose element was dropped or detached are destroyed, and
//!    dormant selectors are resolved again.
//!
//! 3. `unbind` and [`BindingHandle::dispose`] destroy bindings explicitly.
//!
//! Binding consumers capture weak element references only, so a removed
//! element is freed once the cleanup pass has run.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::debug;

use super::apply::apply_value;
use super::{Element, ElementResolver, MutationFeed, MutationRecord, WeakElement};
use crate::error::ReactiveError;
use crate::reactive::{Callback, CallbackError, ConsumerId, ConsumerKind, Runtime};

/// Function producing the value of a bound property.
pub type ValueFn = Rc<dyn Fn() -> Value>;

/// Property used by [`Bindings::text`].
const TEXT: &str = "textContent";

/// A set of selector/property bindings to create together.
#[derive(Default, Clone)]
pub struct Bindings {
    entries: Vec<(String, String, ValueFn)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the text content of every element matching `selector`.
    pub fn text(self, selector: &str, value: impl Fn() -> Value + 'static) -> Self {
        self.property(selector, TEXT, value)
    }

    /// Bind `property` of every element matching `selector`.
    pub fn property(
        mut self,
        selector: &str,
        property: &str,
        value: impl Fn() -> Value + 'static,
    ) -> Self {
        self.entries
            .push((selector.to_owned(), property.to_owned(), Rc::new(value)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries grouped by selector, in first-seen order.
    fn by_selector(self) -> Vec<(String, Vec<(String, ValueFn)>)> {
        let mut groups: Vec<(String, Vec<(String, ValueFn)>)> = Vec::new();
        for (selector, property, value) in self.entries {
            match groups.iter_mut().find(|(s, _)| *s == selector) {
                Some((_, props)) => props.push((property, value)),
                None => groups.push((selector, vec![(property, value)])),
            }
        }
        groups
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(s, p, _)| format!("{s} -> {p}")))
            .finish()
    }
}

struct BindingRecord {
    selector: String,
    element: WeakElement,
    consumers: Vec<ConsumerId>,
    group: u64,
}

struct Dormant {
    selector: String,
    properties: Vec<(String, ValueFn)>,
    group: u64,
}

struct BinderInner {
    runtime: Runtime,
    resolver: Rc<dyn ElementResolver>,
    bindings: RefCell<Vec<BindingRecord>>,
    dormant: RefCell<Vec<Dormant>>,
    next_group: Cell<u64>,
}

/// Creates and cleans up bindings for one runtime.
#[derive(Clone)]
pub struct Binder {
    inner: Rc<BinderInner>,
}

/// Disposer for the bindings created by one [`Binder::bind`] call.
#[must_use = "dropping the handle keeps the bindings; call `dispose` to remove them"]
pub struct BindingHandle {
    binder: Weak<BinderInner>,
    group: u64,
}

impl Binder {
    /// Create a binder resolving selectors through `resolver` and cleaning
    /// up on every batch delivered by `feed`.
    pub fn new(runtime: &Runtime, resolver: Rc<dyn ElementResolver>, feed: &dyn MutationFeed) -> Self {
        let inner = Rc::new(BinderInner {
            runtime: runtime.clone(),
            resolver,
            bindings: RefCell::new(Vec::new()),
            dormant: RefCell::new(Vec::new()),
            next_group: Cell::new(0),
        });

        let weak = Rc::downgrade(&inner);
        feed.observe(Rc::new(move |records: &[MutationRecord]| {
            if let Some(inner) = weak.upgrade() {
                inner.cleanup(records);
            }
        }));

        Self { inner }
    }

    /// Create bindings. Each binding runs once immediately.
    pub fn bind(&self, bindings: Bindings) -> BindingHandle {
        let group = self.inner.next_group.get();
        self.inner.next_group.set(group + 1);

        for (selector, properties) in bindings.by_selector() {
            let elements = self.inner.resolver.resolve(&selector);
            if elements.is_empty() {
                self.inner
                    .runtime
                    .inner
                    .report(ReactiveError::BindingTargetMissing {
                        selector: selector.clone(),
                    });
                self.inner.dormant.borrow_mut().push(Dormant {
                    selector,
                    properties,
                    group,
                });
                continue;
            }
            for element in &elements {
                self.inner.attach(&selector, element, &properties, group);
            }
        }

        BindingHandle {
            binder: Rc::downgrade(&self.inner),
            group,
        }
    }

    /// Destroy every binding created for `selector` or attached to an
    /// element it currently matches. Returns the number of bindings removed.
    pub fn unbind(&self, selector: &str) -> usize {
        let matched = self.inner.resolver.resolve(selector);
        self.inner.dormant.borrow_mut().retain(|d| d.selector != selector);
        self.inner.evict(|record| {
            record.selector == selector || matched.iter().any(|el| record.element.ptr_eq(el))
        })
    }

    /// Run the cleanup pass without waiting for mutation records.
    pub fn cleanup(&self) {
        self.inner.cleanup(&[]);
    }

    /// Number of element bindings currently live.
    pub fn binding_count(&self) -> usize {
        self.inner.bindings.borrow().len()
    }

    /// Number of selectors waiting for a matching element.
    pub fn dormant_count(&self) -> usize {
        self.inner.dormant.borrow().len()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }
}

impl BinderInner {
    fn attach(&self, selector: &str, element: &Element, properties: &[(String, ValueFn)], group: u64) {
        let mut consumers = Vec::with_capacity(properties.len());
        for (property, value) in properties {
            let target = element.downgrade();
            let (property, value) = (property.clone(), Rc::clone(value));
            let callback: Callback = Rc::new(RefCell::new(move || {
                let Some(element) = target.upgrade() else {
                    return Ok(());
                };
                let next = value();
                apply_value(&element, &property, &next).map_err(CallbackError::from)
            }));

            let id = self.runtime.inner.register(ConsumerKind::Binding, callback);
            self.runtime.inner.run_initial(id);
            consumers.push(id);
        }

        debug!(selector, bindings = consumers.len(), "element bound");
        self.bindings.borrow_mut().push(BindingRecord {
            selector: selector.to_owned(),
            element: element.downgrade(),
            consumers,
            group,
        });
    }

    /// Destroy and drop every record matching `predicate`.
    fn evict(&self, mut predicate: impl FnMut(&BindingRecord) -> bool) -> usize {
        let evicted: Vec<BindingRecord> = {
            let mut bindings = self.bindings.borrow_mut();
            let (evicted, kept) = std::mem::take(&mut *bindings)
                .into_iter()
                .partition(|record| predicate(record));
            *bindings = kept;
            evicted
        };
        for record in &evicted {
            for id in &record.consumers {
                self.runtime.destroy(*id);
            }
        }
        evicted.len()
    }

    fn cleanup(&self, records: &[MutationRecord]) {
        let removed: usize = records.iter().map(|r| r.removed.len()).sum();
        let evicted = self.evict(|record| {
            record
                .element
                .upgrade()
                .map_or(true, |element| !element.is_connected())
        });

        let waiting = std::mem::take(&mut *self.dormant.borrow_mut());
        let mut still_waiting = Vec::new();
        let mut revived = 0;
        for dormant in waiting {
            let elements = self.resolver.resolve(&dormant.selector);
            if elements.is_empty() {
                still_waiting.push(dormant);
                continue;
            }
            for element in &elements {
                self.attach(&dormant.selector, element, &dormant.properties, dormant.group);
            }
            revived += 1;
        }
        self.dormant.borrow_mut().extend(still_waiting);

        debug!(removed, evicted, revived, "binding cleanup");
    }

    fn dispose_group(&self, group: u64) -> usize {
        self.dormant.borrow_mut().retain(|d| d.group != group);
        self.evict(|record| record.group == group)
    }
}

impl BindingHandle {
    /// Destroy every binding this handle created, including ones revived
    /// from dormancy since. Returns the number of bindings removed.
    pub fn dispose(self) -> usize {
        match self.binder.upgrade() {
            Some(binder) => binder.dispose_group(self.group),
            None => 0,
        }
    }
}
