//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects state, computed
//! values, effects and bindings. It owns the dependency tables, the
//! recording stack and the update queue of one reactive universe.
//!
//! # How It Works
//!
//! 1. When a consumer runs, the runtime pushes a recording frame, drops the
//!    consumer's previous subscriptions and runs its callback. Every tracked
//!    read subscribes the consumer immediately.
//!
//! 2. When state changes, the runtime:
//!    a. Finds all consumers subscribed to the changed location
//!    b. Marks computed consumers dirty (they recompute on next read)
//!    c. Queues eager consumers (effects, bindings)
//!    d. Flushes the queue unless a batch or flush is already in progress
//!
//! 3. A consumer notified while it is running is re-run once its current run
//!    returns. Chains of such re-runs are capped; past the cap the consumer
//!    is deactivated and a cycle error is reported.
//!
//! # Threading
//!
//! A runtime is single-threaded (`!Send`). Independent runtimes share
//! nothing, which keeps tests isolated from each other.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use tracing::{debug, error, trace, warn};

use super::context::{ContextStack, ReactiveContext};
use super::state::{HandleInner, State};
use super::subscriber::{Callback, ConsumerId, ConsumerKind, ConsumerRecord, RunState};
use crate::config::ReactiveConfig;
use crate::error::ReactiveError;
use crate::graph::{DependencyKey, HandleId, Tracker, UpdateQueue};

type WarningHandler = Rc<dyn Fn(&ReactiveError)>;

/// A reactive universe.
///
/// Cloning a `Runtime` yields another handle to the same universe.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    config: ReactiveConfig,
    tracker: RefCell<Tracker>,
    consumers: RefCell<HashMap<ConsumerId, ConsumerRecord>>,
    context: RefCell<ContextStack>,
    queue: RefCell<UpdateQueue>,
    /// Identity table of live containers. Weak so unused state is freed.
    handles: RefCell<HashMap<HandleId, Weak<HandleInner>>>,
    warning_handler: RefCell<Option<WarningHandler>>,
    diagnostics: RefCell<VecDeque<ReactiveError>>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::from_config(ReactiveConfig::default())
    }

    /// Create a runtime with a custom configuration.
    pub fn with_config(config: ReactiveConfig) -> Result<Self, ReactiveError> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: ReactiveConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                tracker: RefCell::new(Tracker::new()),
                consumers: RefCell::new(HashMap::new()),
                context: RefCell::new(ContextStack::new()),
                queue: RefCell::new(UpdateQueue::new()),
                handles: RefCell::new(HashMap::new()),
                warning_handler: RefCell::new(None),
                diagnostics: RefCell::new(VecDeque::new()),
            }),
        }
    }

    pub fn config(&self) -> &ReactiveConfig {
        &self.inner.config
    }

    /// Whether two handles point at the same universe.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Rc<RuntimeInner>) -> Self {
        Self { inner }
    }

    // =========================================================================
    // BATCHING
    // =========================================================================

    /// Open a batch: notifications queue up instead of running consumers.
    pub fn pause(&self) {
        self.inner.queue.borrow_mut().pause();
    }

    /// Close a batch.
    ///
    /// When the outermost batch closes and `flush` is true, every pending
    /// consumer runs once in the order it was first queued. With `flush`
    /// false the pending set is kept for the next flush.
    pub fn resume(&self, flush: bool) {
        let outermost = self.inner.queue.borrow_mut().resume();
        if outermost && flush {
            self.inner.flush_if_ready();
        }
    }

    /// Run `f` inside a batch and flush afterwards.
    ///
    /// The flush happens even when `f` returns an error value; the value is
    /// handed back to the caller untouched. If `f` panics the batch is closed
    /// without flushing and pending consumers wait for the next flush.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.pause();
        let guard = BatchGuard { runtime: &self.inner };
        let result = f();
        drop(guard);
        result
    }

    /// Run pending consumers now, unless a batch or flush is in progress.
    pub fn flush(&self) {
        self.inner.flush_if_ready();
    }

    pub fn is_batching(&self) -> bool {
        self.inner.queue.borrow().is_batching()
    }

    /// Number of consumers waiting for a flush.
    pub fn pending_count(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Run `f` without tracking any reads it performs.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.untrack(f)
    }

    // =========================================================================
    // CONSUMERS
    // =========================================================================

    /// Remove a consumer's subscriptions and deactivate it.
    ///
    /// A destroyed consumer still waiting in the queue is skipped.
    /// Returns `false` if it was not active.
    pub fn destroy(&self, consumer: ConsumerId) -> bool {
        self.inner.destroy(consumer)
    }

    pub fn is_active(&self, consumer: ConsumerId) -> bool {
        self.inner.consumers.borrow().contains_key(&consumer)
    }

    /// Number of active consumers.
    pub fn consumer_count(&self) -> usize {
        self.inner.consumers.borrow().len()
    }

    /// Number of locations `consumer` currently depends on.
    pub fn dependency_count(&self, consumer: ConsumerId) -> usize {
        self.inner.tracker.borrow().dependency_count(consumer)
    }

    /// Locations `consumer` currently depends on.
    pub fn dependencies(&self, consumer: ConsumerId) -> Vec<DependencyKey> {
        self.inner.tracker.borrow().dependencies(consumer)
    }

    /// Number of consumers subscribed to any property of `handle`.
    pub fn subscriber_count(&self, handle: HandleId) -> usize {
        self.inner.tracker.borrow().subscriber_count(handle)
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    /// Look up a live container by ID.
    pub fn handle(&self, id: HandleId) -> Option<State> {
        self.inner
            .handles
            .borrow()
            .get(&id)
            .and_then(Weak::upgrade)
            .map(State::from_inner)
    }

    /// Number of live containers.
    pub fn handle_count(&self) -> usize {
        self.inner
            .handles
            .borrow()
            .values()
            .filter(|handle| handle.strong_count() > 0)
            .count()
    }

    // =========================================================================
    // DIAGNOSTICS
    // =========================================================================

    /// Route warnings and errors raised during flushes to `handler`.
    ///
    /// Without a handler they are logged through `tracing`.
    pub fn on_warning(&self, handler: impl Fn(&ReactiveError) + 'static) {
        *self.inner.warning_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Go back to logging warnings through `tracing`.
    pub fn clear_warning_handler(&self) {
        self.inner.warning_handler.borrow_mut().take();
    }

    /// Drain the retained diagnostics, oldest first.
    pub fn take_diagnostics(&self) -> Vec<ReactiveError> {
        self.inner.diagnostics.borrow_mut().drain(..).collect()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("consumers", &self.consumer_count())
            .field("handles", &self.handle_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Closes a batch when dropped.
struct BatchGuard<'a> {
    runtime: &'a RuntimeInner,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let outermost = self.runtime.queue.borrow_mut().resume();
        if outermost && !std::thread::panicking() {
            self.runtime.flush_if_ready();
        }
    }
}

/// Returns a consumer to `Idle` if its callback unwinds, so a caught panic
/// does not leave it stuck in `Running`.
struct RunGuard<'a> {
    runtime: &'a RuntimeInner,
    id: ConsumerId,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(mut consumers) = self.runtime.consumers.try_borrow_mut() else {
            return;
        };
        if let Some(record) = consumers.get_mut(&self.id) {
            record.state = RunState::Idle;
            if !record.kind.is_eager() {
                record.dirty = true;
            }
        }
        warn!(consumer = %self.id, "consumer callback panicked");
    }
}

/// Clears the flushing flag when dropped.
struct FlushGuard<'a> {
    queue: &'a RefCell<UpdateQueue>,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.queue.borrow_mut().set_flushing(false);
    }
}

impl RuntimeInner {
    pub(crate) fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = ReactiveContext::untracked(&self.context);
        f()
    }

    /// Subscribe the running consumer, if any, to `key`.
    pub(crate) fn track(&self, key: DependencyKey) {
        let Some(consumer) = self.context.borrow_mut().record() else {
            return;
        };
        if self.tracker.borrow_mut().subscribe(consumer, key.clone()) {
            trace!(%consumer, %key, "tracked");
        }
    }

    /// Propagate a change to `key`.
    pub(crate) fn notify(&self, key: DependencyKey) {
        let affected = self.tracker.borrow().subscribers(&key);
        if affected.is_empty() {
            return;
        }
        trace!(%key, count = affected.len(), "notify");

        let mut invalidated = Vec::new();
        {
            let mut consumers = self.consumers.borrow_mut();
            let mut queue = self.queue.borrow_mut();
            for id in affected {
                let Some(record) = consumers.get_mut(&id) else {
                    continue;
                };
                match record.state {
                    RunState::Running | RunState::Queued => record.state = RunState::Queued,
                    RunState::Idle if record.kind.is_eager() => {
                        queue.enqueue(id);
                    }
                    RunState::Idle => {
                        if !record.dirty {
                            record.dirty = true;
                            invalidated.push(id);
                        }
                    }
                }
            }
        }

        // Readers of a computed hear about it once per clean-to-dirty edge.
        for id in invalidated {
            self.notify(DependencyKey::Computed(id));
        }

        self.flush_if_ready();
    }

    pub(crate) fn flush_if_ready(&self) {
        if self.queue.borrow().can_flush() {
            self.flush();
        }
    }

    fn flush(&self) {
        self.queue.borrow_mut().set_flushing(true);
        let _guard = FlushGuard { queue: &self.queue };

        let limit = self.config.max_rerun_chain;
        let mut runs: HashMap<ConsumerId, usize> = HashMap::new();
        loop {
            let next = {
                let mut queue = self.queue.borrow_mut();
                if queue.is_batching() {
                    None
                } else {
                    queue.pop_front()
                }
            };
            let Some(id) = next else {
                break;
            };

            let count = runs.entry(id).or_insert(0);
            *count += 1;
            if *count > limit {
                // Consumers re-triggering each other within one flush.
                self.fail_cycle(id, limit);
                continue;
            }
            self.run_consumer(id);
        }
        debug!(consumers = runs.len(), "flush complete");
    }

    /// Register a consumer without running it.
    pub(crate) fn register(&self, kind: ConsumerKind, callback: Callback) -> ConsumerId {
        let id = ConsumerId::new();
        self.consumers
            .borrow_mut()
            .insert(id, ConsumerRecord::new(kind, callback));
        debug!(consumer = %id, ?kind, "consumer registered");
        id
    }

    /// Run status of a consumer: `None` once it is inactive.
    pub(crate) fn status(&self, id: ConsumerId) -> Option<(RunState, bool)> {
        self.consumers
            .borrow()
            .get(&id)
            .map(|record| (record.state, record.dirty))
    }

    /// First run of a new eager consumer.
    ///
    /// Consumers it notifies are queued until it returns, the same as during
    /// a flush, then flushed unless a batch is open.
    pub(crate) fn run_initial(&self, id: ConsumerId) {
        let outermost = !self.queue.borrow().is_flushing();
        let guard = outermost.then(|| {
            self.queue.borrow_mut().set_flushing(true);
            FlushGuard { queue: &self.queue }
        });
        self.run_consumer(id);
        drop(guard);
        self.flush_if_ready();
    }

    /// Run a consumer, re-running it while it keeps getting re-triggered.
    pub(crate) fn run_consumer(&self, id: ConsumerId) {
        let callback = {
            let mut consumers = self.consumers.borrow_mut();
            let Some(record) = consumers.get_mut(&id) else {
                return;
            };
            if record.state != RunState::Idle {
                record.state = RunState::Queued;
                return;
            }
            record.state = RunState::Running;
            Rc::clone(&record.callback)
        };

        let mut guard = RunGuard {
            runtime: self,
            id,
            armed: true,
        };
        self.run_chain(id, &callback);
        guard.armed = false;
    }

    fn run_chain(&self, id: ConsumerId, callback: &Callback) {
        let limit = self.config.max_rerun_chain;
        let mut chain = 0;
        loop {
            self.tracker.borrow_mut().clear(id);

            let ctx = ReactiveContext::enter(&self.context, id);
            let result = {
                let mut run = callback.borrow_mut();
                (*run)()
            };
            let reads = ctx.finish();
            trace!(
                consumer = %id,
                reads,
                dependencies = self.tracker.borrow().dependency_count(id),
                "consumer ran"
            );

            let succeeded = result.is_ok();
            if let Err(err) = result {
                let failure = match err.downcast::<ReactiveError>() {
                    Ok(reactive) => *reactive,
                    Err(other) => ReactiveError::Callback {
                        consumer: id,
                        message: other.to_string(),
                    },
                };
                if self.record_failure(id, failure) {
                    return;
                }
            }

            let rerun = {
                let mut consumers = self.consumers.borrow_mut();
                match consumers.get_mut(&id) {
                    Some(record) => {
                        record.dirty = false;
                        if succeeded {
                            record.failures = 0;
                        }
                        if record.state == RunState::Queued {
                            record.state = RunState::Running;
                            true
                        } else {
                            record.state = RunState::Idle;
                            false
                        }
                    }
                    None => {
                        // Destroyed during its own run; drop anything it
                        // subscribed to after that.
                        drop(consumers);
                        self.tracker.borrow_mut().forget_consumer(id);
                        return;
                    }
                }
            };
            if !rerun {
                break;
            }

            chain += 1;
            if chain >= limit {
                self.fail_cycle(id, limit);
                return;
            }
            trace!(consumer = %id, chain, "re-running");
        }
    }

    /// Count a failed run. Returns `true` if the consumer was deactivated.
    fn record_failure(&self, id: ConsumerId, failure: ReactiveError) -> bool {
        let failures = {
            let mut consumers = self.consumers.borrow_mut();
            match consumers.get_mut(&id) {
                Some(record) => {
                    record.failures += 1;
                    record.failures
                }
                None => 0,
            }
        };
        self.report(failure);

        match self.config.max_consecutive_failures {
            Some(max) if failures >= max => {
                self.destroy(id);
                self.report(ReactiveError::RepeatedFailure {
                    consumer: id,
                    failures,
                });
                true
            }
            _ => false,
        }
    }

    fn fail_cycle(&self, id: ConsumerId, limit: usize) {
        error!(consumer = %id, limit, "reactive cycle; deactivating consumer");
        self.destroy(id);
        self.report(ReactiveError::Cycle {
            consumer: id,
            limit,
        });
    }

    pub(crate) fn destroy(&self, id: ConsumerId) -> bool {
        let record = self.consumers.borrow_mut().remove(&id);
        let Some(record) = record else {
            return false;
        };
        self.queue.borrow_mut().remove(id);
        self.tracker.borrow_mut().forget_consumer(id);
        debug!(consumer = %id, kind = ?record.kind, "consumer destroyed");

        // The callback may own state or computed values whose teardown
        // re-enters the runtime, so it is dropped with no borrows held.
        drop(record);
        true
    }

    /// Deliver a diagnostic to the warning channel and retain it.
    pub(crate) fn report(&self, err: ReactiveError) {
        let handler = self.warning_handler.borrow().clone();
        match handler {
            Some(handler) => handler(&err),
            None if err.is_fatal() => error!(%err, "reactive error"),
            None => warn!(%err, "reactive warning"),
        }

        let capacity = self.config.diagnostics_capacity;
        if capacity == 0 {
            return;
        }
        let mut diagnostics = self.diagnostics.borrow_mut();
        while diagnostics.len() >= capacity {
            diagnostics.pop_front();
        }
        diagnostics.push_back(err);
    }

    pub(crate) fn register_handle(&self, id: HandleId, handle: Weak<HandleInner>) {
        self.handles.borrow_mut().insert(id, handle);
    }

    /// Called while a container is being dropped, possibly from inside
    /// another runtime operation, hence the `try_` borrows.
    pub(crate) fn forget_handle(&self, id: HandleId) {
        if let Ok(mut handles) = self.handles.try_borrow_mut() {
            handles.remove(&id);
        }
        if let Ok(mut tracker) = self.tracker.try_borrow_mut() {
            tracker.forget_handle(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::CallbackError;
    use std::cell::Cell;

    fn counting_consumer(rt: &Runtime, kind: ConsumerKind) -> (ConsumerId, Rc<Cell<usize>>) {
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let callback: Callback = Rc::new(RefCell::new(move || {
            counter.set(counter.get() + 1);
            Ok::<(), CallbackError>(())
        }));
        (rt.inner.register(kind, callback), runs)
    }

    #[test]
    fn notify_runs_eager_and_dirties_lazy() {
        let rt = Runtime::new();
        let handle = HandleId::new();
        let key = DependencyKey::property(handle, "x");

        let (effect, effect_runs) = counting_consumer(&rt, ConsumerKind::Effect);
        let (computed, computed_runs) = counting_consumer(&rt, ConsumerKind::Computed);
        rt.inner.tracker.borrow_mut().subscribe(effect, key.clone());
        rt.inner.tracker.borrow_mut().subscribe(computed, key.clone());
        rt.inner.consumers.borrow_mut().get_mut(&computed).unwrap().dirty = false;

        rt.inner.notify(key);

        assert_eq!(effect_runs.get(), 1);
        assert_eq!(computed_runs.get(), 0);
        assert_eq!(rt.inner.status(computed), Some((RunState::Idle, true)));
    }

    #[test]
    fn batch_defers_until_outermost_resume() {
        let rt = Runtime::new();
        let key = DependencyKey::property(HandleId::new(), "x");
        let (effect, runs) = counting_consumer(&rt, ConsumerKind::Effect);
        rt.inner.tracker.borrow_mut().subscribe(effect, key.clone());

        rt.pause();
        rt.pause();
        rt.inner.notify(key.clone());
        rt.inner.notify(key.clone());
        rt.resume(true);
        assert_eq!(runs.get(), 0);
        assert_eq!(rt.pending_count(), 1);

        rt.resume(true);
        assert_eq!(runs.get(), 1);
        assert_eq!(rt.pending_count(), 0);
    }

    #[test]
    fn resume_without_flush_keeps_pending() {
        let rt = Runtime::new();
        let key = DependencyKey::property(HandleId::new(), "x");
        let (effect, runs) = counting_consumer(&rt, ConsumerKind::Effect);
        rt.inner.tracker.borrow_mut().subscribe(effect, key.clone());

        rt.pause();
        rt.inner.notify(key);
        rt.resume(false);
        assert_eq!(runs.get(), 0);
        assert_eq!(rt.pending_count(), 1);

        rt.flush();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn destroyed_consumer_is_skipped_when_its_turn_comes() {
        let rt = Runtime::new();
        let key = DependencyKey::property(HandleId::new(), "x");
        let (effect, runs) = counting_consumer(&rt, ConsumerKind::Effect);
        rt.inner.tracker.borrow_mut().subscribe(effect, key.clone());

        rt.batch(|| {
            rt.inner.notify(key.clone());
            assert!(rt.destroy(effect));
        });

        assert_eq!(runs.get(), 0);
        assert!(!rt.is_active(effect));
        assert!(!rt.destroy(effect));
    }

    #[test]
    fn warnings_go_to_handler_and_are_retained() {
        let rt = Runtime::with_config(ReactiveConfig {
            diagnostics_capacity: 2,
            ..ReactiveConfig::default()
        })
        .unwrap();
        let seen = Rc::new(Cell::new(0));
        let seen_clone = seen.clone();
        rt.on_warning(move |_| seen_clone.set(seen_clone.get() + 1));

        for selector in ["#a", "#b", "#c"] {
            rt.inner.report(ReactiveError::BindingTargetMissing {
                selector: selector.into(),
            });
        }

        assert_eq!(seen.get(), 3);
        let retained = rt.take_diagnostics();
        assert_eq!(retained.len(), 2);
        assert_eq!(
            retained[0],
            ReactiveError::BindingTargetMissing {
                selector: "#b".into()
            }
        );
        assert!(rt.take_diagnostics().is_empty());
    }

    #[test]
    fn failing_consumer_survives_unless_capped() {
        let rt = Runtime::with_config(ReactiveConfig {
            max_consecutive_failures: Some(2),
            ..ReactiveConfig::default()
        })
        .unwrap();
        let callback: Callback = Rc::new(RefCell::new(|| Err::<(), CallbackError>("boom".into())));
        let id = rt.inner.register(ConsumerKind::Effect, callback);

        rt.inner.run_consumer(id);
        assert!(rt.is_active(id));
        rt.inner.run_consumer(id);
        assert!(!rt.is_active(id));

        let diagnostics = rt.take_diagnostics();
        assert!(matches!(diagnostics[0], ReactiveError::Callback { .. }));
        assert!(matches!(
            diagnostics.last(),
            Some(ReactiveError::RepeatedFailure { failures: 2, .. })
        ));
    }
}
