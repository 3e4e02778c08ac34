//! # Invocation queue.
//!
//! One capsule owns one bounded multi-producer/single-consumer queue of
//! [`Invocation`]s. The synchronizer (and the services derived from it) write;
//! the invocation loop is the sole reader.
//!
//! ## Rules
//! - **Suspend on full**: producers `send().await` and wait for space.
//!   Invocations are never dropped and a full queue is never an error.
//! - **FIFO per producer**: writes from a single task are delivered in
//!   program order; ordering across racing producers follows the channel's
//!   internal arbitration.
//! - **Close on drop**: the queue closes when the owning
//!   [`Synchronizer`](crate::Synchronizer) (the only strong sender) is
//!   dropped, which tells the loop to terminate cleanly.

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::config::QueueConfig;
use crate::error::InvocationFailure;

/// One enqueued unit of work: a boxed closure that receives exclusive access
/// to the capsule implementation and resolves to a loop-owned outcome.
///
/// The error side is only meaningful for loop-owned invocations; wrappers
/// created for await-completion calls capture the caller-facing result
/// themselves and always resolve `Ok` here.
pub type Invocation<C> =
    Box<dyn for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), InvocationFailure>> + Send>;

/// Creates the bounded invocation queue for one capsule.
pub(crate) fn bounded<C>(
    cfg: &QueueConfig,
) -> (mpsc::Sender<Invocation<C>>, mpsc::Receiver<Invocation<C>>) {
    mpsc::channel(cfg.capacity_clamped())
}
