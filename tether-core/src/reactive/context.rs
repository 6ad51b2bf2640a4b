//! Reactive Context
//!
//! The reactive context records which consumer is currently running and
//! what it reads. This enables automatic dependency tracking: when a state
//! property is read, the runtime asks the context who is reading it.
//!
//! # Implementation
//!
//! Each runtime owns its own stack of recording frames. Running a consumer
//! pushes a frame for it; `untrack` pushes a frame with no consumer, which
//! suspends tracking for everything nested inside it. Frames are popped by a
//! guard, so the stack stays balanced even if a callback panics.

use std::cell::RefCell;

use super::ConsumerId;

#[derive(Debug)]
struct Frame {
    /// `None` while tracking is suspended.
    consumer: Option<ConsumerId>,
    /// Tracked reads in this frame, repeats included. The tracker owns the
    /// deduplicated key set.
    reads: usize,
}

/// The recording stack of one runtime.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Vec<Frame>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, consumer: Option<ConsumerId>) {
        self.frames.push(Frame {
            consumer,
            reads: 0,
        });
    }

    fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// The consumer reads are attributed to, if tracking is active.
    pub fn current(&self) -> Option<ConsumerId> {
        self.frames.last().and_then(|frame| frame.consumer)
    }

    /// Whether any frame (tracked or not) is open.
    pub fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Count a read in the top frame.
    ///
    /// Returns the reading consumer when the read is tracked.
    pub fn record(&mut self) -> Option<ConsumerId> {
        let frame = self.frames.last_mut()?;
        let consumer = frame.consumer?;
        frame.reads += 1;
        Some(consumer)
    }

    /// Whether `consumer` has a frame anywhere on the stack.
    pub fn is_running(&self, consumer: ConsumerId) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.consumer == Some(consumer))
    }
}

/// Guard that pops its frame when dropped.
pub struct ReactiveContext<'a> {
    stack: &'a RefCell<ContextStack>,
    consumer: Option<ConsumerId>,
    open: bool,
}

impl<'a> ReactiveContext<'a> {
    /// Enter a tracked frame for `consumer`.
    pub fn enter(stack: &'a RefCell<ContextStack>, consumer: ConsumerId) -> Self {
        Self::open(stack, Some(consumer))
    }

    /// Enter a frame in which reads are not tracked.
    pub fn untracked(stack: &'a RefCell<ContextStack>) -> Self {
        Self::open(stack, None)
    }

    fn open(stack: &'a RefCell<ContextStack>, consumer: Option<ConsumerId>) -> Self {
        stack.borrow_mut().push(consumer);
        Self {
            stack,
            consumer,
            open: true,
        }
    }

    /// Leave the frame and return how many tracked reads it saw.
    pub fn finish(mut self) -> usize {
        self.open = false;
        self.pop_own().map_or(0, |frame| frame.reads)
    }

    fn pop_own(&self) -> Option<Frame> {
        let popped = self.stack.borrow_mut().pop();
        if let Some(frame) = &popped {
            debug_assert_eq!(
                frame.consumer, self.consumer,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.consumer, frame.consumer
            );
        }
        popped
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            self.pop_own();
        }
    }
}
