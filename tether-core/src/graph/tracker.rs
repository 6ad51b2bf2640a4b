//! Dependency Tracker
//!
//! The tracker stores the subscription edges of the reactive graph in both
//! directions: per key, the consumers that read it (dependents), and per
//! consumer, the keys it read (dependencies). Keeping both lets a consumer
//! drop every subscription in one pass before it re-runs.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::key::{DependencyKey, HandleId, Property};
use crate::reactive::ConsumerId;

/// Consumers reached by one notification. Usually only a handful.
pub type Subscribers = SmallVec<[ConsumerId; 8]>;

/// Subscription tables for one runtime.
#[derive(Debug, Default)]
pub struct Tracker {
    /// Container properties to the consumers that read them.
    properties: HashMap<HandleId, HashMap<Property, BTreeSet<ConsumerId>>>,

    /// Computed values to the consumers that read them.
    computed: HashMap<ConsumerId, BTreeSet<ConsumerId>>,

    /// Consumers to the keys they read, in first-read order.
    dependencies: HashMap<ConsumerId, IndexSet<DependencyKey>>,
}

impl Tracker {
    /// Create empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `consumer` read `key`.
    ///
    /// Returns `false` if the subscription already existed.
    pub fn subscribe(&mut self, consumer: ConsumerId, key: DependencyKey) -> bool {
        if !self.dependencies.entry(consumer).or_default().insert(key.clone()) {
            return false;
        }
        match key {
            DependencyKey::Property(handle, property) => {
                self.properties
                    .entry(handle)
                    .or_default()
                    .entry(property)
                    .or_default()
                    .insert(consumer);
            }
            DependencyKey::Computed(source) => {
                self.computed.entry(source).or_default().insert(consumer);
            }
        }
        true
    }

    /// Remove every subscription held by `consumer`.
    pub fn clear(&mut self, consumer: ConsumerId) {
        let Some(keys) = self.dependencies.remove(&consumer) else {
            return;
        };

        for key in keys {
            match key {
                DependencyKey::Property(handle, property) => {
                    let Some(by_property) = self.properties.get_mut(&handle) else {
                        continue;
                    };
                    if let Some(consumers) = by_property.get_mut(&property) {
                        consumers.remove(&consumer);
                        if consumers.is_empty() {
                            by_property.remove(&property);
                        }
                    }
                    if by_property.is_empty() {
                        self.properties.remove(&handle);
                    }
                }
                DependencyKey::Computed(source) => {
                    if let Some(consumers) = self.computed.get_mut(&source) {
                        consumers.remove(&consumer);
                        if consumers.is_empty() {
                            self.computed.remove(&source);
                        }
                    }
                }
            }
        }
    }

    /// Drop a consumer entirely: its own subscriptions and everyone
    /// subscribed to it as a computed source.
    pub fn forget_consumer(&mut self, consumer: ConsumerId) {
        self.clear(consumer);
        if let Some(readers) = self.computed.remove(&consumer) {
            let key = DependencyKey::Computed(consumer);
            for reader in readers {
                if let Some(keys) = self.dependencies.get_mut(&reader) {
                    keys.shift_remove(&key);
                }
            }
        }
    }

    /// Drop all subscriptions on a container that no longer exists.
    pub fn forget_handle(&mut self, handle: HandleId) {
        let Some(by_property) = self.properties.remove(&handle) else {
            return;
        };
        for (property, consumers) in by_property {
            let key = DependencyKey::Property(handle, property);
            for consumer in consumers {
                if let Some(keys) = self.dependencies.get_mut(&consumer) {
                    keys.shift_remove(&key);
                }
            }
        }
    }

    /// Consumers affected by a change to `key`, in creation order.
    ///
    /// A property change reaches subscribers of that property and of `*`.
    /// A `*` change reaches every subscriber of the container.
    pub fn subscribers(&self, key: &DependencyKey) -> Subscribers {
        let mut affected = BTreeSet::new();
        match key {
            DependencyKey::Property(handle, property) => {
                let Some(by_property) = self.properties.get(handle) else {
                    return Subscribers::new();
                };
                if *property == Property::Any {
                    for consumers in by_property.values() {
                        affected.extend(consumers.iter().copied());
                    }
                } else {
                    for wanted in [property, &Property::Any] {
                        if let Some(consumers) = by_property.get(wanted) {
                            affected.extend(consumers.iter().copied());
                        }
                    }
                }
            }
            DependencyKey::Computed(source) => {
                if let Some(consumers) = self.computed.get(source) {
                    affected.extend(consumers.iter().copied());
                }
            }
        }
        affected.into_iter().collect()
    }

    /// Keys currently read by `consumer`.
    pub fn dependencies(&self, consumer: ConsumerId) -> Vec<DependencyKey> {
        self.dependencies
            .get(&consumer)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of keys currently read by `consumer`.
    pub fn dependency_count(&self, consumer: ConsumerId) -> usize {
        self.dependencies.get(&consumer).map_or(0, IndexSet::len)
    }

    /// Number of distinct consumers subscribed to any property of `handle`.
    pub fn subscriber_count(&self, handle: HandleId) -> usize {
        self.subscribers(&DependencyKey::Property(handle, Property::Any))
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_change_reaches_property_and_star() {
        let mut tracker = Tracker::new();
        let handle = HandleId::new();
        let reads_count = ConsumerId::new();
        let reads_all = ConsumerId::new();
        let reads_other = ConsumerId::new();

        tracker.subscribe(reads_count, DependencyKey::property(handle, "count"));
        tracker.subscribe(reads_all, DependencyKey::property(handle, "*"));
        tracker.subscribe(reads_other, DependencyKey::property(handle, "other"));

        let affected = tracker.subscribers(&DependencyKey::property(handle, "count"));
        assert_eq!(affected.as_slice(), &[reads_count, reads_all]);
    }

    #[test]
    fn star_change_reaches_every_subscriber() {
        let mut tracker = Tracker::new();
        let handle = HandleId::new();
        let a = ConsumerId::new();
        let b = ConsumerId::new();

        tracker.subscribe(a, DependencyKey::Property(handle, Property::Length));
        tracker.subscribe(b, DependencyKey::Property(handle, Property::Index(0)));

        let affected = tracker.subscribers(&DependencyKey::Property(handle, Property::Any));
        assert_eq!(affected.as_slice(), &[a, b]);
    }

    #[test]
    fn clear_removes_stale_subscriptions() {
        let mut tracker = Tracker::new();
        let handle = HandleId::new();
        let consumer = ConsumerId::new();

        assert!(tracker.subscribe(consumer, DependencyKey::property(handle, "a")));
        assert!(!tracker.subscribe(consumer, DependencyKey::property(handle, "a")));
        assert_eq!(tracker.dependency_count(consumer), 1);

        tracker.clear(consumer);
        assert_eq!(tracker.dependency_count(consumer), 0);
        assert!(tracker
            .subscribers(&DependencyKey::property(handle, "a"))
            .is_empty());
        assert_eq!(tracker.subscriber_count(handle), 0);
    }

    #[test]
    fn forgetting_a_handle_prunes_reverse_edges() {
        let mut tracker = Tracker::new();
        let handle = HandleId::new();
        let kept = HandleId::new();
        let consumer = ConsumerId::new();

        tracker.subscribe(consumer, DependencyKey::property(handle, "a"));
        tracker.subscribe(consumer, DependencyKey::property(kept, "b"));
        tracker.forget_handle(handle);

        assert_eq!(
            tracker.dependencies(consumer),
            vec![DependencyKey::property(kept, "b")]
        );
    }

    #[test]
    fn computed_sources_notify_readers() {
        let mut tracker = Tracker::new();
        let computed = ConsumerId::new();
        let reader = ConsumerId::new();

        tracker.subscribe(reader, DependencyKey::Computed(computed));
        assert_eq!(
            tracker.subscribers(&DependencyKey::Computed(computed)).as_slice(),
            &[reader]
        );

        tracker.forget_consumer(computed);
        assert!(tracker
            .subscribers(&DependencyKey::Computed(computed))
            .is_empty());
        assert_eq!(tracker.dependency_count(reader), 0);
    }
}
