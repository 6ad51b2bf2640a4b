//! Dependency Keys
//!
//! A dependency key names one observable location: a property of a reactive
//! container, or the output of a computed value.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::reactive::ConsumerId;

/// Unique identifier for a reactive container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    /// Generate a new unique handle ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A property of a reactive container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Property {
    /// A named key of an object.
    Key(String),
    /// A position in an array.
    Index(usize),
    /// The length of an array.
    Length,
    /// Any property at all (`"*"`): key enumeration, whole-array mutation.
    Any,
}

impl From<&str> for Property {
    fn from(key: &str) -> Self {
        match key {
            "*" => Property::Any,
            _ => Property::Key(key.to_owned()),
        }
    }
}

impl From<usize> for Property {
    fn from(index: usize) -> Self {
        Property::Index(index)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Key(key) => f.write_str(key),
            Property::Index(index) => write!(f, "{index}"),
            Property::Length => f.write_str("length"),
            Property::Any => f.write_str("*"),
        }
    }
}

/// An observable location a consumer can depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyKey {
    /// A property of a reactive container.
    Property(HandleId, Property),
    /// The cached value of a computed consumer.
    Computed(ConsumerId),
}

impl DependencyKey {
    pub fn property(handle: HandleId, property: impl Into<Property>) -> Self {
        DependencyKey::Property(handle, property.into())
    }

    /// The container this key belongs to, if any.
    pub fn handle(&self) -> Option<HandleId> {
        match self {
            DependencyKey::Property(handle, _) => Some(*handle),
            DependencyKey::Computed(_) => None,
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKey::Property(handle, property) => write!(f, "{handle}.{property}"),
            DependencyKey::Computed(id) => write!(f, "computed{id}"),
        }
    }
}
