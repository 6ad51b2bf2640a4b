//! Array Interception
//!
//! Mutating array operations run to completion on the raw elements and then
//! notify `*` once, so a `push` costs one notification no matter how many
//! indices it touches. Non-mutating reads track `length` plus every element
//! they look at.
//!
//! The element vector is taken out of the container while an operation runs.
//! User comparators may therefore read the state without tripping a borrow,
//! at the cost of seeing an empty array during the sort.

use std::cmp::Ordering;
use std::ops::{Bound, Range, RangeBounds};

use serde_json::Value;
use tracing::debug;

use super::state::{Entry, Slot, State, Target};
use crate::graph::Property;

fn resolve_range(range: impl RangeBounds<usize>, len: usize) -> Range<usize> {
    let start = match range.start_bound() {
        Bound::Included(&n) => n,
        Bound::Excluded(&n) => n.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&n) => n.saturating_add(1),
        Bound::Excluded(&n) => n,
        Bound::Unbounded => len,
    };
    let end = end.min(len);
    start.min(end)..end
}

/// Rank used by [`State::sort`]: numbers, strings, booleans, containers, null.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Bool(_) => 2,
        Value::Array(_) | Value::Object(_) => 3,
        Value::Null => 4,
    }
}

fn natural_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

impl State {
    /// Run `op` on the raw elements and notify `*` if it reports a change.
    ///
    /// Returns `None` when called on an object.
    fn mutate_array<R>(&self, op: impl FnOnce(&mut Vec<Slot>) -> (R, bool)) -> Option<R> {
        let mut items = {
            let mut target = self.target().borrow_mut();
            match &mut *target {
                Target::Array(items) => std::mem::take(items),
                Target::Object(_) => {
                    debug!(handle = %self.id(), "array mutation on an object ignored");
                    return None;
                }
            }
        };

        let (result, changed) = op(&mut items);

        {
            let mut target = self.target().borrow_mut();
            if let Target::Array(slot) = &mut *target {
                *slot = items;
            }
        }

        if changed {
            self.notify(Property::Any);
        }
        Some(result)
    }

    /// Read an element, wrapping nested containers on first access.
    pub fn index(&self, index: usize) -> Option<Entry> {
        self.track(Property::Index(index));
        let mut target = self.target().borrow_mut();
        let Target::Array(items) = &mut *target else {
            return None;
        };
        let slot = items.get_mut(index)?;
        Some(self.materialize(slot))
    }

    /// Write an element. Writing past the end pads with `null`.
    pub fn set_index(&self, index: usize, value: impl Into<Value>) -> bool {
        self.store_index(index, Slot::Plain(value.into()))
    }

    /// Append an element and return the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        self.mutate_array(|items| {
            items.push(Slot::Plain(value));
            (items.len(), true)
        })
        .unwrap_or(0)
    }

    /// Append several elements with a single notification.
    pub fn extend(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let values: Vec<Slot> = values.into_iter().map(Slot::Plain).collect();
        self.mutate_array(|items| {
            let changed = !values.is_empty();
            items.extend(values);
            (items.len(), changed)
        })
        .unwrap_or(0)
    }

    pub fn pop(&self) -> Option<Entry> {
        self.mutate_array(|items| {
            let popped = items.pop();
            let changed = popped.is_some();
            (popped.map(Slot::into_entry), changed)
        })
        .flatten()
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Entry> {
        self.mutate_array(|items| {
            if items.is_empty() {
                (None, false)
            } else {
                (Some(items.remove(0).into_entry()), true)
            }
        })
        .flatten()
    }

    /// Prepend elements, keeping their order, and return the new length.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let values: Vec<Slot> = values.into_iter().map(Slot::Plain).collect();
        self.mutate_array(|items| {
            let changed = !values.is_empty();
            items.splice(0..0, values);
            (items.len(), changed)
        })
        .unwrap_or(0)
    }

    /// Remove `delete_count` elements at `start` and insert `insert` there.
    ///
    /// Returns the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        insert: impl IntoIterator<Item = Value>,
    ) -> Vec<Entry> {
        let insert: Vec<Slot> = insert.into_iter().map(Slot::Plain).collect();
        self.mutate_array(|items| {
            let range = resolve_range(start..start.saturating_add(delete_count), items.len());
            let changed = !range.is_empty() || !insert.is_empty();
            let removed: Vec<Entry> = items.splice(range, insert).map(Slot::into_entry).collect();
            (removed, changed)
        })
        .unwrap_or_default()
    }

    /// Stable sort: numbers ascending, then strings, booleans, containers
    /// and finally nulls.
    pub fn sort(&self) {
        self.sort_by(natural_order);
    }

    /// Stable sort by a comparator over the plain values.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        self.mutate_array(|items| {
            let mut keyed: Vec<(Value, Slot)> = items
                .drain(..)
                .map(|slot| (slot.to_raw(), slot))
                .collect();
            keyed.sort_by(|(a, _), (b, _)| compare(a, b));
            items.extend(keyed.into_iter().map(|(_, slot)| slot));
            ((), true)
        });
    }

    pub fn reverse(&self) {
        self.mutate_array(|items| {
            items.reverse();
            ((), items.len() > 1)
        });
    }

    /// Overwrite every element in `range` with `value`.
    pub fn fill(&self, value: impl Into<Value>, range: impl RangeBounds<usize>) {
        let value = value.into();
        self.mutate_array(|items| {
            let range = resolve_range(range, items.len());
            let changed = !range.is_empty();
            for slot in &mut items[range] {
                *slot = Slot::Plain(value.clone());
            }
            ((), changed)
        });
    }

    /// Copy the elements in `range` to position `dest`, within the array.
    ///
    /// Elements that would land past the end are dropped.
    pub fn copy_within(&self, range: impl RangeBounds<usize>, dest: usize) {
        self.mutate_array(|items| {
            let len = items.len();
            let source = resolve_range(range, len);
            let count = source.len().min(len.saturating_sub(dest));
            let copied: Vec<Slot> = items[source.start..source.start + count].to_vec();
            for (offset, slot) in copied.into_iter().enumerate() {
                items[dest + offset] = slot;
            }
            ((), count > 0)
        });
    }

    // =========================================================================
    // NON-MUTATING READS
    // =========================================================================

    /// Every element, in order.
    pub fn to_vec(&self) -> Vec<Entry> {
        let len = self.len();
        (0..len).filter_map(|i| self.index(i)).collect()
    }

    /// Iterate over the elements present when the iterator was created.
    pub fn iter(&self) -> impl Iterator<Item = Entry> + '_ {
        let len = self.len();
        (0..len).filter_map(move |i| self.index(i))
    }

    pub fn map<T>(&self, mut f: impl FnMut(Entry, usize) -> T) -> Vec<T> {
        self.iter().enumerate().map(|(i, entry)| f(entry, i)).collect()
    }

    pub fn filter(&self, mut predicate: impl FnMut(&Entry) -> bool) -> Vec<Entry> {
        self.iter().filter(|entry| predicate(entry)).collect()
    }

    pub fn slice(&self, range: impl RangeBounds<usize>) -> Vec<Entry> {
        let range = resolve_range(range, self.len());
        range.filter_map(|i| self.index(i)).collect()
    }

    /// The elements as plain JSON followed by `others`.
    pub fn concat(&self, others: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut out: Vec<Value> = self.iter().map(|entry| entry.snapshot()).collect();
        out.extend(others);
        out
    }

    /// Position of the first element equal to `needle`.
    ///
    /// Containers never match: they are compared by identity.
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        self.iter().position(|entry| entry.as_value() == Some(needle))
    }

    pub fn includes(&self, needle: &Value) -> bool {
        self.index_of(needle).is_some()
    }
}
