//! # Opt-in capsule features.
//!
//! A capsule implementation can opt into extra capabilities by implementing
//! the traits in this module and enabling them on the
//! [`CapsuleBuilder`](crate::CapsuleBuilder). Feature wiring is fully
//! static: each `with_*` builder method carries the matching trait bound, so
//! there is no runtime capability inspection.
//!
//! Injected services are not available while the implementation's
//! constructor runs; use [`Initializer`] for setup that needs them.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::core::WeakSynchronizer;
use crate::error::{CapsuleError, InvocationFailure};
use crate::timers::TimerService;

/// Async initialization, executed as the very first invocation of the
/// capsule's loop, before any externally enqueued work.
///
/// All other enabled features are injected by the time `initialize` runs. A
/// returned error goes through the loop's failure mode like any other
/// loop-owned invocation failure.
#[async_trait]
pub trait Initializer: Send + 'static {
    async fn initialize(&mut self) -> Result<(), InvocationFailure>;
}

/// Timer feature. Implementations store the injected
/// [`TimerService`] in a slot the runtime can reach.
///
/// The slot is `None` until encapsulation with
/// [`with_timers`](crate::CapsuleBuilder::with_timers) populates it.
pub trait Timers: Sized + Send + 'static {
    /// Accessor for the timer service slot.
    fn timers_slot(&mut self) -> &mut Option<TimerService<Self>>;
}

/// Self-enqueueing feature: the capsule receives a handle for enqueuing
/// invocations onto its own queue.
///
/// This is for integrating callback-driven libraries that would otherwise
/// call into the capsule from arbitrary threads: the callback captures a
/// (cloneable) [`SelfEnqueuer`] and turns its work into a queued invocation.
pub trait SelfEnqueueing: Sized + Send + 'static {
    /// Accessor for the self-enqueuer slot.
    fn enqueuer_slot(&mut self) -> &mut Option<SelfEnqueuer<Self>>;
}

/// Enqueues invocations on a capsule's own queue from within the capsule or
/// from foreign callbacks.
///
/// Holds a weak reference to the queue: an enqueuer stored inside the
/// capsule (or leaked into an external library) never keeps the capsule
/// alive, and enqueuing after teardown fails with
/// [`CapsuleError::LoopTerminated`].
pub struct SelfEnqueuer<C> {
    sync: WeakSynchronizer<C>,
}

impl<C> Clone for SelfEnqueuer<C> {
    fn clone(&self) -> Self {
        Self {
            sync: self.sync.clone(),
        }
    }
}

impl<C: Send + 'static> SelfEnqueuer<C> {
    pub(crate) fn new(sync: WeakSynchronizer<C>) -> Self {
        Self { sync }
    }

    /// Enqueues a loop-owned invocation, suspending while the queue is full.
    ///
    /// Errors produced by `f` route to the loop's failure mode.
    pub async fn enqueue<F>(&self, f: F) -> Result<(), CapsuleError>
    where
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), InvocationFailure>>
            + Send
            + 'static,
    {
        self.sync.enqueue_return(f).await
    }

    /// Blocking variant of [`enqueue`](Self::enqueue) for foreign (non-async)
    /// callback threads. Must not be called from within an async runtime.
    pub fn enqueue_blocking<F>(&self, f: F) -> Result<(), CapsuleError>
    where
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), InvocationFailure>>
            + Send
            + 'static,
    {
        self.sync.enqueue_return_blocking(f)
    }
}
