//! # Timer service: delayed self-invocations for capsules.
//!
//! A capsule cannot safely hand `&mut self` to a background timer task, so
//! timer callbacks go through the capsule's own queue instead: when a timer
//! expires, its callback is enqueued like any other loop-owned invocation
//! and runs serialized with everything else.
//!
//! ```text
//! start_single_shot(timeout, cb)
//!        │ spawn
//!        ▼
//!   delay task ── delay elapsed, not cancelled ──► enqueue(cb)
//!        │
//!        └── always (fired / cancelled / capsule gone) ──► enqueue(cleanup)
//! ```
//!
//! ## Rules
//! - The service lives **inside** its capsule and is not thread-safe by
//!   itself; it is safe because every mutation of its bookkeeping happens
//!   from invocations already serialized by the capsule's loop.
//! - At most one pending timer per discriminator: starting a new timer with
//!   an existing discriminator cancels the old one.
//! - Cancellation only prevents callbacks that have not been enqueued yet;
//!   it never retracts an enqueued one.
//! - Cleanup always runs, whatever the timer's outcome, and removes
//!   completed references from within the capsule's serialized execution,
//!   never from the background delay task.

mod delay;
mod reference;

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::core::WeakSynchronizer;
use crate::error::InvocationFailure;
use crate::features::Timers;

pub use delay::DelayFn;
pub use reference::TimerReference;

/// Schedules single-shot callbacks that run in the context of the owning
/// capsule. Injected via the [`Timers`](crate::Timers) feature.
pub struct TimerService<C> {
    sync: WeakSynchronizer<C>,
    delay: DelayFn,
    timers: Vec<TimerReference>,
}

impl<C: Timers> TimerService<C> {
    /// Creates a timer service with the default never-fires-early delay
    /// provider.
    pub fn new(sync: WeakSynchronizer<C>) -> Self {
        Self::with_delay_provider(sync, delay::at_least())
    }

    /// Creates a timer service with a custom delay provider. Meant for
    /// tests that need to control time.
    pub fn with_delay_provider(sync: WeakSynchronizer<C>, delay: DelayFn) -> Self {
        Self {
            sync,
            delay,
            timers: Vec::new(),
        }
    }

    /// Registers a timer and starts it immediately. After `timeout` has
    /// elapsed, `callback` is enqueued for execution in the context of the
    /// capsule; its errors route to the loop's failure mode.
    ///
    /// When only one timer of a specific kind should be pending (e.g. a
    /// retry timer), pass a discriminator: any existing timer with the same
    /// one is cancelled first.
    ///
    /// Must be called from within the capsule, which also implies a running
    /// tokio runtime.
    pub fn start_single_shot<F>(
        &mut self,
        timeout: Duration,
        callback: F,
        discriminator: Option<&str>,
    ) -> TimerReference
    where
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), InvocationFailure>>
            + Send
            + 'static,
    {
        if let Some(discriminator) = discriminator {
            for stale in self
                .timers
                .iter()
                .filter(|t| t.discriminator() == Some(discriminator))
            {
                stale.cancel();
            }
        }

        let reference = TimerReference::new(timeout, discriminator.map(str::to_owned));
        self.timers.push(reference.clone());

        let token = reference.token();
        let completed = reference.completed_flag();
        let sync = self.sync.clone();
        let elapsed = (self.delay)(timeout);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = elapsed => {
                    if !token.is_cancelled() && sync.enqueue_return(callback).await.is_err() {
                        debug!(capsule = sync.capsule_name(), "timer fired after capsule teardown");
                    }
                }
            }

            completed.store(true, std::sync::atomic::Ordering::Release);

            // Bookkeeping is only touched from serialized invocations, so
            // removal is enqueued rather than done here. Runs whatever the
            // timer's outcome was.
            let _ = sync
                .enqueue_return(|c: &mut C| {
                    async move {
                        if let Some(timers) = c.timers_slot().as_mut() {
                            timers.clear_elapsed();
                        }
                        Ok(())
                    }
                    .boxed()
                })
                .await;
        });

        reference
    }

    /// Cancels all pending timers. Callbacks already enqueued because their
    /// timer elapsed remain enqueued.
    pub fn cancel_all(&self) {
        for timer in &self.timers {
            timer.cancel();
        }
    }

    /// The number of timers currently tracked, including timers that just
    /// completed but have not been cleaned up yet.
    pub fn count(&self) -> usize {
        self.timers.len()
    }

    fn clear_elapsed(&mut self) {
        self.timers.retain(|t| !t.is_completed());
    }
}
