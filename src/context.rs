//! # Runtime context and capsule construction.
//!
//! [`RuntimeContext`] bundles everything needed to wire a new capsule: the
//! host's registration handle and the default configuration. It is cheap to
//! clone and immutable after construction.
//!
//! Encapsulation assembles the pieces in a fixed order:
//!
//! ```text
//! capsule(imp) ──► queue + status + parked slot
//!              ──► Synchronizer
//!              ──► feature injection (timers, self-enqueuer)
//!              ──► initializer staged as the loop's first invocation
//!              ──► InvocationLoop registered with the host
//!              ──► Synchronizer returned to the facade
//! ```
//!
//! Feature opt-in is static: each `with_*` method requires the matching
//! trait bound on the implementation type, so a feature cannot be enabled
//! for a capsule that does not support it.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{Config, FailureMode, QueueConfig};
use crate::core::{bounded, Invocation, InvocationLoop, LoopStatus, Synchronizer};
use crate::core::HostHandle;
use crate::error::HostError;
use crate::features::{Initializer, SelfEnqueueing, SelfEnqueuer, Timers};
use crate::timers::{DelayFn, TimerService};

type Injector<C> = Box<dyn FnOnce(&mut C, &Synchronizer<C>) + Send>;

/// The environment capsules are wired into: a host plus default settings.
/// Obtained from [`Host::context`](crate::Host::context).
#[derive(Clone)]
pub struct RuntimeContext {
    handle: HostHandle,
    config: Config,
}

impl RuntimeContext {
    pub(crate) fn new(handle: HostHandle, config: Config) -> Self {
        Self { handle, config }
    }

    /// The configuration newly encapsulated capsules default to.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts building a capsule around `imp`.
    pub fn capsule<C: Send + 'static>(&self, imp: C) -> CapsuleBuilder<'_, C> {
        CapsuleBuilder {
            ctx: self,
            imp,
            queue: self.config.queue.clone(),
            failure_mode: self.config.failure_mode,
            init: None,
            injectors: Vec::new(),
        }
    }

    /// Encapsulates `imp` with default settings and no optional features.
    ///
    /// The returned [`Synchronizer`] is the capsule's only gateway; embed it
    /// in a facade that forwards each operation under the appropriate
    /// synchronization contract. Dropping it releases the capsule.
    pub fn encapsulate<C: Send + 'static>(&self, imp: C) -> Result<Synchronizer<C>, HostError> {
        self.capsule(imp).encapsulate()
    }
}

/// Configures one capsule before it starts. Created by
/// [`RuntimeContext::capsule`].
pub struct CapsuleBuilder<'a, C> {
    ctx: &'a RuntimeContext,
    imp: C,
    queue: QueueConfig,
    failure_mode: FailureMode,
    init: Option<Invocation<C>>,
    injectors: Vec<Injector<C>>,
}

impl<'a, C: Send + 'static> CapsuleBuilder<'a, C> {
    /// Overrides the invocation queue settings for this capsule.
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Overrides the failure mode for this capsule's loop.
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Runs [`Initializer::initialize`] as the very first invocation of the
    /// loop, before any externally enqueued work.
    pub fn with_initializer(mut self) -> Self
    where
        C: Initializer,
    {
        self.init = Some(Box::new(|c| c.initialize()));
        self
    }

    /// Injects a [`TimerService`] into the implementation's timer slot.
    pub fn with_timers(self) -> Self
    where
        C: Timers,
    {
        self.with_injected_timers(None)
    }

    /// As [`with_timers`](Self::with_timers), with a custom delay provider.
    pub fn with_timers_using(self, delay: DelayFn) -> Self
    where
        C: Timers,
    {
        self.with_injected_timers(Some(delay))
    }

    fn with_injected_timers(mut self, delay: Option<DelayFn>) -> Self
    where
        C: Timers,
    {
        self.injectors.push(Box::new(move |imp, sync| {
            let service = match delay {
                Some(delay) => TimerService::with_delay_provider(sync.downgrade(), delay),
                None => TimerService::new(sync.downgrade()),
            };
            *imp.timers_slot() = Some(service);
        }));
        self
    }

    /// Injects a [`SelfEnqueuer`] into the implementation's enqueuer slot.
    pub fn with_self_enqueue(mut self) -> Self
    where
        C: SelfEnqueueing,
    {
        self.injectors.push(Box::new(|imp, sync| {
            *imp.enqueuer_slot() = Some(SelfEnqueuer::new(sync.downgrade()));
        }));
        self
    }

    /// Wires the capsule and registers its loop with the host.
    ///
    /// The loop starts running once the host's run picks the registration
    /// up; invocations enqueued before that simply wait in the queue.
    pub fn encapsulate(mut self) -> Result<Synchronizer<C>, HostError> {
        let (tx, rx) = bounded(&self.queue);
        let status = Arc::new(LoopStatus::new());
        let parked = Arc::new(Mutex::new(None));
        let synchronizer = Synchronizer::new(tx, status.clone(), parked.clone());

        for inject in self.injectors {
            inject(&mut self.imp, &synchronizer);
        }

        let looped = InvocationLoop::new(rx, self.imp, parked, status, self.failure_mode, self.init);
        self.ctx.handle.register(looped)?;

        Ok(synchronizer)
    }
}
