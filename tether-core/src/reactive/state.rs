//! Reactive State
//!
//! A [`State`] wraps a plain JSON object or array and observes every access
//! to it. Reads subscribe the running consumer; writes notify subscribers.
//!
//! # How State Works
//!
//! 1. The raw value is moved into the handle, which owns it exclusively.
//!    Exactly one handle exists per raw value.
//!
//! 2. Nested objects and arrays are stored raw and wrapped on first access.
//!    The child handle replaces the raw value in its slot, so later reads
//!    return the same child handle and deep writes stay observable.
//!
//! 3. Writes compare old and new values first. Equal primitives, the same
//!    child handle or the same opaque value skip notification entirely.
//!
//! # Opaque values
//!
//! Values that are not plain data (anything behind `Rc<dyn Any>`) are stored
//! verbatim and compared by pointer. Changes to their internals are not
//! observed.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::memo::Computed;
use super::runtime::{Runtime, RuntimeInner};
use crate::error::ReactiveError;
use crate::graph::{DependencyKey, HandleId, Property};

/// Key under which primitives passed to [`Runtime::state`] are stored.
pub const PRIMITIVE_KEY: &str = "value";

/// Largest run of `null` padding one index write may add to an array.
pub const MAX_INDEX_GAP: usize = 1 << 16;

/// A reactive object or array.
///
/// Cloning a `State` yields another handle to the same container.
#[derive(Clone)]
pub struct State {
    inner: Rc<HandleInner>,
}

/// A non-owning reference to a [`State`].
#[derive(Clone)]
pub struct WeakState {
    inner: Weak<HandleInner>,
}

pub(crate) struct HandleInner {
    id: HandleId,
    is_array: bool,
    target: RefCell<Target>,
    computeds: RefCell<IndexMap<String, Computed<Value>>>,
    runtime: Weak<RuntimeInner>,
}

pub(crate) enum Target {
    Object(IndexMap<String, Slot>),
    Array(Vec<Slot>),
}

/// One stored value.
#[derive(Clone)]
pub(crate) enum Slot {
    /// Primitive, or an object/array not yet read.
    Plain(Value),
    /// A wrapped object/array.
    Reactive(State),
    /// Non-plain data, stored verbatim.
    Opaque(Rc<dyn Any>),
}

impl Slot {
    /// Whether writing `other` over `self` changes nothing observable.
    pub(crate) fn same_as(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Plain(a), Slot::Plain(b)) => is_primitive(a) && a == b,
            (Slot::Reactive(a), Slot::Reactive(b)) => a.ptr_eq(b),
            (Slot::Opaque(a), Slot::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn into_entry(self) -> Entry {
        match self {
            Slot::Plain(value) => Entry::Value(value),
            Slot::Reactive(state) => Entry::State(state),
            Slot::Opaque(value) => Entry::Opaque(value),
        }
    }

    pub(crate) fn to_raw(&self) -> Value {
        self.raw_within(&mut Vec::new())
    }

    fn raw_within(&self, path: &mut Vec<HandleId>) -> Value {
        match self {
            Slot::Plain(value) => value.clone(),
            Slot::Reactive(state) => state.raw_within(path),
            Slot::Opaque(_) => Value::Null,
        }
    }
}

fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

/// The result of reading a state property.
#[derive(Clone)]
pub enum Entry {
    /// A primitive, or a raw object/array handed out without wrapping.
    Value(Value),
    /// A nested reactive container.
    State(State),
    /// A non-plain value stored verbatim.
    Opaque(Rc<dyn Any>),
}

impl Entry {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Entry::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_state(&self) -> Option<&State> {
        match self {
            Entry::State(state) => Some(state),
            _ => None,
        }
    }

    pub fn into_state(self) -> Option<State> {
        match self {
            Entry::State(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_opaque<T: 'static>(&self) -> Option<&T> {
        match self {
            Entry::Opaque(value) => value.downcast_ref(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    /// Untracked deep copy as plain JSON.
    pub fn to_raw(&self) -> Value {
        match self {
            Entry::Value(value) => value.clone(),
            Entry::State(state) => state.to_raw(),
            Entry::Opaque(_) => Value::Null,
        }
    }

    /// Deep copy as plain JSON, tracking every nested container read.
    pub fn snapshot(&self) -> Value {
        match self {
            Entry::State(state) => state.snapshot(),
            other => other.to_raw(),
        }
    }
}

impl PartialEq<Value> for Entry {
    fn eq(&self, other: &Value) -> bool {
        self.as_value() == Some(other)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Entry::State(state) => f.debug_tuple("State").field(state).finish(),
            Entry::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

/// Whether `entry` is a reactive container.
pub fn is_reactive(entry: &Entry) -> bool {
    matches!(entry, Entry::State(_))
}

/// Unwrap an entry to plain JSON for code that is not reactive-aware.
pub fn to_raw(entry: &Entry) -> Value {
    entry.to_raw()
}

impl Runtime {
    /// Wrap a plain value in a reactive container.
    ///
    /// Objects and arrays are wrapped as they are. Primitives are wrapped as
    /// `{"value": primitive}`.
    pub fn state(&self, initial: Value) -> State {
        State::from_raw(self.downgrade(), initial)
    }

    /// Wrap a list of values in a reactive array.
    pub fn collection(&self, items: Vec<Value>) -> State {
        self.state(Value::Array(items))
    }

    /// Serialize `value` and wrap the result.
    pub fn state_from<T: Serialize>(&self, value: &T) -> Result<State, ReactiveError> {
        Ok(self.state(serde_json::to_value(value)?))
    }
}

impl State {
    pub(crate) fn from_raw(runtime: Weak<RuntimeInner>, raw: Value) -> State {
        let (is_array, target) = match raw {
            Value::Array(items) => (true, Target::Array(items.into_iter().map(Slot::Plain).collect())),
            Value::Object(map) => (
                false,
                Target::Object(map.into_iter().map(|(k, v)| (k, Slot::Plain(v))).collect()),
            ),
            primitive => {
                let mut map = IndexMap::new();
                map.insert(PRIMITIVE_KEY.to_owned(), Slot::Plain(primitive));
                (false, Target::Object(map))
            }
        };

        let inner = Rc::new(HandleInner {
            id: HandleId::new(),
            is_array,
            target: RefCell::new(target),
            computeds: RefCell::new(IndexMap::new()),
            runtime,
        });
        if let Some(rt) = inner.runtime.upgrade() {
            rt.register_handle(inner.id, Rc::downgrade(&inner));
        }
        State { inner }
    }

    pub(crate) fn from_inner(inner: Rc<HandleInner>) -> State {
        State { inner }
    }

    pub(crate) fn target(&self) -> &RefCell<Target> {
        &self.inner.target
    }

    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    pub fn is_array(&self) -> bool {
        self.inner.is_array
    }

    /// Whether both handles refer to the same container.
    pub fn ptr_eq(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakState {
        WeakState {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// The runtime this state reports to, if it is still alive.
    pub fn runtime(&self) -> Option<Runtime> {
        self.inner.runtime.upgrade().map(Runtime::from_inner)
    }

    pub(crate) fn track(&self, property: Property) {
        if let Some(rt) = self.inner.runtime.upgrade() {
            rt.track(DependencyKey::Property(self.inner.id, property));
        }
    }

    pub(crate) fn notify(&self, property: Property) {
        if let Some(rt) = self.inner.runtime.upgrade() {
            rt.notify(DependencyKey::Property(self.inner.id, property));
        }
    }

    /// Notify several properties as one batch.
    pub(crate) fn notify_all(&self, properties: impl IntoIterator<Item = Property>) {
        let Some(rt) = self.runtime() else {
            return;
        };
        rt.batch(|| {
            for property in properties {
                self.notify(property);
            }
        });
    }

    /// Turn a raw nested object/array into a child handle, in place.
    pub(crate) fn materialize(&self, slot: &mut Slot) -> Entry {
        if let Slot::Plain(value) = slot {
            if !is_primitive(value) {
                let raw = std::mem::take(value);
                let child = State::from_raw(self.inner.runtime.clone(), raw);
                *slot = Slot::Reactive(child.clone());
                return Entry::State(child);
            }
        }
        slot.clone().into_entry()
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Read a property.
    ///
    /// On arrays, numeric keys read elements and `"length"` reads the length.
    pub fn get(&self, key: &str) -> Option<Entry> {
        if self.is_array() {
            if key == "length" {
                return Some(Entry::Value(self.len().into()));
            }
            return key.parse::<usize>().ok().and_then(|index| self.index(index));
        }

        self.track(Property::Key(key.to_owned()));

        let computed = self.inner.computeds.borrow().get(key).cloned();
        if let Some(computed) = computed {
            return Some(Entry::Value(computed.get()));
        }

        let mut target = self.inner.target.borrow_mut();
        let Target::Object(map) = &mut *target else {
            return None;
        };
        let slot = map.get_mut(key)?;
        Some(self.materialize(slot))
    }

    /// Read a property as plain JSON; missing properties read as `null`.
    ///
    /// Nested containers are copied deeply and tracked.
    pub fn value(&self, key: &str) -> Value {
        self.get(key).map(|entry| entry.snapshot()).unwrap_or(Value::Null)
    }

    /// Follow a dot-separated path such as `"user.tags.0"`.
    pub fn get_path(&self, path: &str) -> Option<Entry> {
        let mut segments = path.split('.').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let mut current = self.get(first)?;
        for segment in segments {
            current = current.as_state()?.get(segment)?;
        }
        Some(current)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.track(Property::Key(key.to_owned()));
        match &*self.inner.target.borrow() {
            Target::Object(map) => {
                map.contains_key(key) || self.inner.computeds.borrow().contains_key(key)
            }
            Target::Array(items) => key.parse::<usize>().map_or(false, |i| i < items.len()),
        }
    }

    /// Property names (object) or indices (array). Depends on every property.
    pub fn keys(&self) -> Vec<String> {
        self.track(Property::Any);
        match &*self.inner.target.borrow() {
            Target::Object(map) => map.keys().cloned().collect(),
            Target::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    /// Number of elements (array) or properties (object).
    pub fn len(&self) -> usize {
        if self.is_array() {
            self.track(Property::Length);
        } else {
            self.track(Property::Any);
        }
        match &*self.inner.target.borrow() {
            Target::Object(map) => map.len(),
            Target::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Untracked deep copy as plain JSON.
    ///
    /// Opaque values come out as `null`, and so does a container nested
    /// inside itself.
    pub fn to_raw(&self) -> Value {
        self.raw_within(&mut Vec::new())
    }

    /// `path` holds the containers currently being copied.
    fn raw_within(&self, path: &mut Vec<HandleId>) -> Value {
        if path.contains(&self.id()) {
            return Value::Null;
        }
        path.push(self.id());
        let raw = match &*self.inner.target.borrow() {
            Target::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, slot)| (key.clone(), slot.raw_within(path)))
                    .collect(),
            ),
            Target::Array(items) => {
                Value::Array(items.iter().map(|slot| slot.raw_within(path)).collect())
            }
        };
        path.pop();
        raw
    }

    /// Deep copy as plain JSON that depends on everything it copied.
    ///
    /// A container nested inside itself comes out as `null`.
    pub fn snapshot(&self) -> Value {
        self.snapshot_within(&mut Vec::new())
    }

    fn snapshot_within(&self, path: &mut Vec<HandleId>) -> Value {
        if path.contains(&self.id()) {
            return Value::Null;
        }
        self.track(Property::Any);
        path.push(self.id());
        let mut copy = |entry: Entry| match entry {
            Entry::State(child) => child.snapshot_within(path),
            other => other.to_raw(),
        };
        let snapshot = {
            let mut target = self.inner.target.borrow_mut();
            match &mut *target {
                Target::Object(map) => {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (key, slot) in map.iter_mut() {
                        out.insert(key.clone(), copy(self.materialize(slot)));
                    }
                    Value::Object(out)
                }
                Target::Array(items) => Value::Array(
                    items
                        .iter_mut()
                        .map(|slot| copy(self.materialize(slot)))
                        .collect(),
                ),
            }
        };
        path.pop();
        snapshot
    }

    /// Deserialize the current contents, tracking everything read.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ReactiveError> {
        Ok(serde_json::from_value(self.snapshot())?)
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Write a plain value. Returns `false` if nothing changed.
    ///
    /// Objects and arrays always count as a change: a new raw value has a new
    /// identity.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        self.store(key, Slot::Plain(value.into()))
    }

    /// Store an existing container as a child.
    pub fn set_state(&self, key: &str, state: &State) -> bool {
        self.store(key, Slot::Reactive(state.clone()))
    }

    /// Store a non-plain value verbatim.
    pub fn set_opaque(&self, key: &str, value: Rc<dyn Any>) -> bool {
        self.store(key, Slot::Opaque(value))
    }

    /// Serialize `value` and write it.
    pub fn set_serialized<T: Serialize>(&self, key: &str, value: &T) -> Result<bool, ReactiveError> {
        Ok(self.set(key, serde_json::to_value(value)?))
    }

    fn store(&self, key: &str, slot: Slot) -> bool {
        if self.is_array() {
            return match key.parse::<usize>() {
                Ok(index) => self.store_index(index, slot),
                Err(_) => {
                    debug!(handle = %self.id(), key, "ignoring named write to an array");
                    false
                }
            };
        }

        let previous = {
            let mut target = self.inner.target.borrow_mut();
            let Target::Object(map) = &mut *target else {
                return false;
            };
            match map.get_mut(key) {
                Some(existing) if existing.same_as(&slot) => return false,
                Some(existing) => Some(std::mem::replace(existing, slot)),
                None => {
                    map.insert(key.to_owned(), slot);
                    None
                }
            }
        };
        // Released only after the borrow: dropping a child may re-enter.
        drop(previous);

        self.notify(Property::Key(key.to_owned()));
        true
    }

    pub(crate) fn store_index(&self, index: usize, slot: Slot) -> bool {
        let (previous, grew) = {
            let mut target = self.inner.target.borrow_mut();
            let Target::Array(items) = &mut *target else {
                return false;
            };
            if index < items.len() {
                if items[index].same_as(&slot) {
                    return false;
                }
                (Some(std::mem::replace(&mut items[index], slot)), false)
            } else if index - items.len() > MAX_INDEX_GAP {
                debug!(
                    handle = %self.id(),
                    index,
                    len = items.len(),
                    "ignoring index write too far past the end"
                );
                return false;
            } else {
                items.resize(index, Slot::Plain(Value::Null));
                items.push(slot);
                (None, true)
            }
        };
        drop(previous);

        if grew {
            self.notify_all([Property::Index(index), Property::Length]);
        } else {
            self.notify(Property::Index(index));
        }
        true
    }

    /// Remove a property. Always notifies.
    ///
    /// On arrays the element is replaced by `null`, leaving the length alone.
    pub fn delete(&self, key: &str) -> bool {
        let (removed, property) = {
            let mut target = self.inner.target.borrow_mut();
            match &mut *target {
                Target::Object(map) => (map.shift_remove(key), Property::Key(key.to_owned())),
                Target::Array(items) => match key.parse::<usize>() {
                    Ok(index) if index < items.len() => (
                        Some(std::mem::replace(&mut items[index], Slot::Plain(Value::Null))),
                        Property::Index(index),
                    ),
                    Ok(index) => (None, Property::Index(index)),
                    Err(_) => (None, Property::Key(key.to_owned())),
                },
            }
        };
        let existed = removed.is_some();
        drop(removed);

        self.notify(property);
        existed
    }

    // =========================================================================
    // COMPUTED PROPERTIES
    // =========================================================================

    /// Attach a lazily computed property readable through [`State::get`].
    ///
    /// Redefining a name replaces the previous computed.
    pub fn define_computed(&self, name: &str, compute: impl Fn(&State) -> Value + 'static) {
        let Some(rt) = self.runtime() else {
            return;
        };
        let weak = self.downgrade();
        let computed = rt.computed(move || match weak.upgrade() {
            Some(state) => compute(&state),
            None => Value::Null,
        });
        let previous = self
            .inner
            .computeds
            .borrow_mut()
            .insert(name.to_owned(), computed);
        drop(previous);

        self.notify(Property::Key(name.to_owned()));
    }

    /// Names of the computed properties attached to this state.
    pub fn computed_names(&self) -> Vec<String> {
        self.inner.computeds.borrow().keys().cloned().collect()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.inner.id)
            .field("is_array", &self.inner.is_array)
            .field("value", &self.to_raw())
            .finish()
    }
}

impl WeakState {
    pub fn upgrade(&self) -> Option<State> {
        self.inner.upgrade().map(State::from_inner)
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.forget_handle(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_reads_return_the_same_child() {
        let rt = Runtime::new();
        let state = rt.state(json!({"user": {"name": "ada"}}));

        let first = state.get("user").and_then(Entry::into_state).unwrap();
        let second = state.get("user").and_then(Entry::into_state).unwrap();
        assert!(first.ptr_eq(&second));
        assert!(rt.handle(first.id()).unwrap().ptr_eq(&first));
    }

    #[test]
    fn primitives_are_wrapped_under_value() {
        let rt = Runtime::new();
        let state = rt.state(json!(5));
        assert_eq!(state.value(PRIMITIVE_KEY), json!(5));
        assert!(!state.is_array());
    }

    #[test]
    fn equal_primitive_write_is_not_a_change() {
        let rt = Runtime::new();
        let state = rt.state(json!({"count": 1}));
        assert!(!state.set("count", 1));
        assert!(state.set("count", 2));
        // A fresh object always has a new identity.
        assert!(state.set("obj", json!({})));
        assert!(state.set("obj", json!({})));
    }

    #[test]
    fn same_child_or_opaque_is_not_a_change() {
        let rt = Runtime::new();
        let state = rt.state(json!({}));
        let child = rt.state(json!({"a": 1}));
        assert!(state.set_state("child", &child));
        assert!(!state.set_state("child", &child));

        let token: Rc<dyn Any> = Rc::new(42u32);
        assert!(state.set_opaque("token", token.clone()));
        assert!(!state.set_opaque("token", token));
        assert_eq!(state.get("token").unwrap().as_opaque::<u32>(), Some(&42));
    }

    #[test]
    fn paths_and_raw_copies() {
        let rt = Runtime::new();
        let state = rt.state(json!({"user": {"tags": ["a", "b"]}}));
        assert_eq!(state.get_path("user.tags.1").unwrap(), json!("b"));
        assert!(state.get_path("user.missing.0").is_none());

        let entry = state.get("user").unwrap();
        assert!(is_reactive(&entry));
        assert_eq!(to_raw(&entry), json!({"tags": ["a", "b"]}));
        assert_eq!(state.to_raw(), json!({"user": {"tags": ["a", "b"]}}));
    }

    #[test]
    fn delete_reports_presence() {
        let rt = Runtime::new();
        let state = rt.state(json!({"a": 1}));
        assert!(state.delete("a"));
        assert!(!state.delete("a"));
        assert_eq!(state.keys(), Vec::<String>::new());
    }

    #[test]
    fn serde_round_trip_through_state() {
        #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Todo {
            title: String,
            done: bool,
        }

        let rt = Runtime::new();
        let state = rt
            .state_from(&Todo {
                title: "write".into(),
                done: false,
            })
            .unwrap();
        state.set("done", true);
        let todo: Todo = state.deserialize().unwrap();
        assert!(todo.done);
    }

    #[test]
    fn dropped_state_leaves_identity_table() {
        let rt = Runtime::new();
        let state = rt.state(json!({}));
        let id = state.id();
        assert!(rt.handle(id).is_some());
        drop(state);
        assert!(rt.handle(id).is_none());
        assert_eq!(rt.handle_count(), 0);
    }

    #[test]
    fn index_writes_far_past_the_end_are_ignored() {
        let rt = Runtime::new();
        let list = rt.collection(vec![json!(1)]);

        assert!(!list.set("99999999999", 2));
        assert!(!list.set_index(MAX_INDEX_GAP + 2, 2));
        assert_eq!(list.to_raw(), json!([1]));

        assert!(list.set("3", 4));
        assert_eq!(list.to_raw(), json!([1, null, null, 4]));
    }

    #[test]
    fn self_containing_state_copies_as_null() {
        let rt = Runtime::new();
        let a = rt.state(json!({"n": 1}));
        let b = rt.state(json!({"m": 2}));
        a.set_state("me", &a);
        a.set_state("b", &b);
        b.set_state("a", &a);

        assert_eq!(a.to_raw(), json!({"n": 1, "me": null, "b": {"m": 2, "a": null}}));
        assert_eq!(a.snapshot(), json!({"n": 1, "me": null, "b": {"m": 2, "a": null}}));
        assert_eq!(b.to_raw(), json!({"m": 2, "a": {"n": 1, "me": null, "b": null}}));

        a.delete("me");
        a.delete("b");
    }
}
