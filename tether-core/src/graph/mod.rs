//! Dependency Graph
//!
//! This module holds the bookkeeping side of the reactive system: which
//! consumers read which locations, and which consumers are waiting to run.
//!
//! # Overview
//!
//! - Keys name observable locations: a property of a container, or a
//!   computed value.
//! - The tracker stores edges in both directions (key to consumers, consumer
//!   to keys) so that a consumer's subscriptions can be rebuilt on every run.
//! - The update queue stores pending consumers in insertion order together
//!   with the batch depth.
//!
//! Nothing in this module runs user code; execution lives in
//! [`crate::reactive::Runtime`].

mod key;
mod scheduler;
mod tracker;

pub use key::{DependencyKey, HandleId, Property};
pub use scheduler::UpdateQueue;
pub use tracker::{Subscribers, Tracker};
