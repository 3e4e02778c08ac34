//! # capvisor
//!
//! **capvisor** turns an ordinary mutable value into a concurrency-safe unit,
//! a *capsule*, by routing every call through a bounded single-consumer
//! invocation queue. Within one capsule exactly one invocation runs at a
//! time, to completion, so the implementation needs no locking of its own;
//! across capsules, loops run in parallel as independent tasks.
//!
//! ## Architecture
//! ```text
//!  callers (any task/thread)                 one capsule
//!  ┌───────────────┐
//!  │ facade method │──► Synchronizer ──► InvocationQueue ──► InvocationLoop
//!  └───────────────┘    (4 contracts)     (bounded MPSC)      │  owns impl,
//!  ┌───────────────┐         ▲                                │  runs one
//!  │ facade method │─────────┘                                │  invocation
//!  └───────────────┘                                          ▼  at a time
//!                                                        capsule impl
//!
//!  Host ──── supervises every InvocationLoop as a task ────┐
//!   │   · reaps finished loops, escalates aborts/panics    │
//!   │   · propagates the external cancellation signal      │
//!   └── · drains accepted work within a grace period ──────┘
//! ```
//!
//! ## Synchronization contracts
//! | Contract (facade declares per operation) | Caller resumes when…                     |
//! |------------------------------------------|------------------------------------------|
//! | `AwaitCompletion`                        | the invocation ran to completion         |
//! | `AwaitReception`                         | the loop started the invocation          |
//! | `AwaitEnqueueing`                        | the invocation was admitted to the queue |
//! | `PassThrough`                            | immediately; queue bypassed              |
//! | `AwaitCompletionOrPassThroughIfQueueClosed` | as completion, inline once terminated |
//!
//! ## Failure handling
//! Await-completion callers get their capsule method's own `Result` back,
//! unchanged. Everything loop-owned (fire-and-forget work, timer callbacks,
//! the initializer) goes through the loop's [`FailureMode`]: `Continue` logs
//! and proceeds, `Abort` terminates the loop and fails [`Host::run`].
//! Cancellation is logged as a warning and never escalates.
//!
//! ## Example
//! ```rust
//! use capvisor::{CapsuleError, Config, Host, Synchronizer};
//! use futures::FutureExt;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Sensor {
//!     reading: f64,
//! }
//!
//! impl Sensor {
//!     async fn calibrate(&mut self, offset: f64) -> f64 {
//!         self.reading += offset;
//!         self.reading
//!     }
//! }
//!
//! /// Hand-written facade; every method forwards under one contract.
//! struct SensorCapsule {
//!     sync: Synchronizer<Sensor>,
//! }
//!
//! impl SensorCapsule {
//!     async fn calibrate(&self, offset: f64) -> Result<f64, CapsuleError> {
//!         self.sync
//!             .enqueue_await_result(move |s: &mut Sensor| s.calibrate(offset).boxed())
//!             .await
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = Host::new(Config::default());
//!     let ctx = host.context();
//!     let shutdown = CancellationToken::new();
//!     let runner = tokio::spawn(host.run(shutdown.clone()));
//!
//!     let sensor = SensorCapsule {
//!         sync: ctx.encapsulate(Sensor { reading: 0.0 })?,
//!     };
//!     // Safe from any number of tasks; calls serialize inside the capsule.
//!     assert_eq!(sensor.calibrate(1.5).await?, 1.5);
//!     assert_eq!(sensor.calibrate(0.5).await?, 2.0);
//!
//!     shutdown.cancel();
//!     runner.await??;
//!     Ok(())
//! }
//! ```
//!
//! ## Optional capsule features
//! Implementations opt in statically via traits plus the matching builder
//! call: [`Initializer`] (async setup as the loop's first invocation),
//! [`Timers`] (delayed self-invocations through [`TimerService`]), and
//! [`SelfEnqueueing`] (enqueue onto the own queue from foreign callbacks).

mod config;
mod context;
mod core;
mod error;
mod features;
mod timers;

// ---- Public re-exports ----

pub use config::{Config, FailureMode, QueueConfig};
pub use context::{CapsuleBuilder, RuntimeContext};
pub use core::{
    Host, HostHandle, Invocation, InvocationLoop, LoopStatus, Synchronization, Synchronizer,
    WeakSynchronizer,
};
pub use error::{CapsuleError, HostError, InvocationFailure};
pub use features::{Initializer, SelfEnqueueing, SelfEnqueuer, Timers};
pub use timers::{DelayFn, TimerReference, TimerService};
