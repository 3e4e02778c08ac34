//! # Synchronizer: the producer-side gateway of one capsule.
//!
//! The synchronizer turns calls into [`Invocation`]s and writes them to the
//! capsule's queue under one of four contracts:
//!
//! | Contract                      | Caller resumes when…                    | Callee errors go to… |
//! |-------------------------------|-----------------------------------------|----------------------|
//! | [`enqueue_await_result`]      | the invocation ran to completion        | the caller           |
//! | [`enqueue_await_reception`]   | the loop started the invocation         | the loop             |
//! | [`enqueue_return`]            | the invocation was admitted to the queue| the loop             |
//! | [`pass_through`]              | immediately (queue bypassed)            | the caller           |
//!
//! [`enqueue_await_result`]: Synchronizer::enqueue_await_result
//! [`enqueue_await_reception`]: Synchronizer::enqueue_await_reception
//! [`enqueue_return`]: Synchronizer::enqueue_return
//! [`pass_through`]: Synchronizer::pass_through
//!
//! ## Ownership
//! The synchronizer is the only strong sender of its queue and is not
//! `Clone`: dropping it closes the queue, which terminates the invocation
//! loop of a capsule nobody references anymore. Services that live *inside*
//! the capsule (timers, self-enqueuers) hold a [`WeakSynchronizer`] so a
//! capsule can never keep its own queue alive.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::core::queue::Invocation;
use crate::core::status::LoopStatus;
use crate::error::{CapsuleError, InvocationFailure};

/// The per-operation synchronization contracts, as declared at a facade
/// method. The runtime itself does not interpret this enum; it is the shared
/// vocabulary between facade authors (or facade generators) and the
/// [`Synchronizer`] methods implementing each contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Synchronization {
    /// Full round-trip: enqueue and await completion, results and errors
    /// travel back to the caller. The default for ordinary methods.
    AwaitCompletion,
    /// Acknowledgement only: await the start of execution, not its outcome.
    AwaitReception,
    /// Fire-and-forget: return as soon as the invocation is admitted.
    AwaitEnqueueing,
    /// Bypass the queue entirely; valid only for immutable state.
    PassThrough,
    /// As `AwaitCompletion`, but run inline against the parked state if the
    /// loop has already terminated.
    AwaitCompletionOrPassThroughIfQueueClosed,
}

impl Default for Synchronization {
    fn default() -> Self {
        Synchronization::AwaitCompletion
    }
}

/// Producer-facing API of one capsule. Obtained from
/// [`RuntimeContext::encapsulate`](crate::RuntimeContext::encapsulate) or the
/// [`CapsuleBuilder`](crate::CapsuleBuilder); facades embed it and forward
/// their methods through it.
///
/// All methods take `&self` and are safe under arbitrary concurrent callers.
pub struct Synchronizer<C> {
    tx: mpsc::Sender<Invocation<C>>,
    status: Arc<LoopStatus>,
    parked: Arc<Mutex<Option<C>>>,
    capsule: &'static str,
}

impl<C> fmt::Debug for Synchronizer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("capsule", &self.capsule)
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> Synchronizer<C> {
    pub(crate) fn new(
        tx: mpsc::Sender<Invocation<C>>,
        status: Arc<LoopStatus>,
        parked: Arc<Mutex<Option<C>>>,
    ) -> Self {
        Self {
            tx,
            status,
            parked,
            capsule: type_name::<C>(),
        }
    }

    /// Type name of the capsule implementation behind this synchronizer.
    pub fn capsule_name(&self) -> &'static str {
        self.capsule
    }

    /// Enqueues an invocation and awaits its completion.
    ///
    /// `R` is typically the capsule method's own `Result`, so callee errors
    /// travel back to the caller unchanged and never reach the loop's
    /// failure handling.
    ///
    /// Suspends while the queue is full. Fails with
    /// [`CapsuleError::LoopTerminated`] if the loop already exited, or with
    /// [`CapsuleError::ResultDropped`] if the loop went away after accepting
    /// the invocation but before completing it.
    pub async fn enqueue_await_result<R, F>(&self, f: F) -> Result<R, CapsuleError>
    where
        R: Send + 'static,
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, R> + Send + 'static,
    {
        let (done, received) = oneshot::channel();
        let inv: Invocation<C> = Box::new(move |c| {
            async move {
                let out = f(c).await;
                let _ = done.send(out);
                Ok(())
            }
            .boxed()
        });
        self.write(inv).await?;

        received.await.map_err(|_| CapsuleError::ResultDropped {
            capsule: self.capsule,
        })
    }

    /// As [`enqueue_await_result`](Self::enqueue_await_result), but if the
    /// loop has already terminated the invocation runs inline on the
    /// caller's task, against the parked capsule state.
    ///
    /// The fallback bypasses all serialization; it is only sound for
    /// operations that cannot race anything once the loop is gone, which is
    /// the caller's responsibility to guarantee.
    pub async fn enqueue_await_result_or_pass_through<R, F>(&self, f: F) -> Result<R, CapsuleError>
    where
        R: Send + 'static,
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, R> + Send + 'static,
    {
        if self.status.terminated() {
            let mut parked = self.parked.lock().await;
            return match parked.as_mut() {
                Some(imp) => Ok(f(imp).await),
                None => Err(CapsuleError::LoopTerminated {
                    capsule: self.capsule,
                }),
            };
        }
        self.enqueue_await_result(f).await
    }

    /// Enqueues an invocation and awaits its reception: the returned future
    /// resolves the instant the loop starts executing the invocation, not
    /// when it finishes.
    ///
    /// Errors produced by `f` afterwards are invisible to the caller; they
    /// route to the loop's failure mode.
    pub async fn enqueue_await_reception<F>(&self, f: F) -> Result<(), CapsuleError>
    where
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), InvocationFailure>>
            + Send
            + 'static,
    {
        let (started, received) = oneshot::channel::<()>();
        let inv: Invocation<C> = Box::new(move |c| {
            async move {
                let _ = started.send(());
                f(c).await
            }
            .boxed()
        });
        self.write(inv).await?;

        received.await.map_err(|_| CapsuleError::ResultDropped {
            capsule: self.capsule,
        })
    }

    /// Enqueues an invocation and returns once it has been admitted to the
    /// queue (fire-and-forget).
    ///
    /// Errors produced by `f` route to the loop's failure mode.
    pub async fn enqueue_return<F>(&self, f: F) -> Result<(), CapsuleError>
    where
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), InvocationFailure>>
            + Send
            + 'static,
    {
        let inv: Invocation<C> = Box::new(f);
        self.write(inv).await
    }

    /// Executes `f` synchronously, bypassing the queue.
    ///
    /// The closure gets no access to the serialized capsule state; facades
    /// use this for immutable state they hold themselves, which keeps the
    /// contract ("pass-through must not touch mutable capsule state")
    /// enforced by construction.
    pub fn pass_through<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }

    /// Creates a weak handle that can enqueue loop-owned invocations without
    /// keeping the capsule's queue alive.
    pub fn downgrade(&self) -> WeakSynchronizer<C> {
        WeakSynchronizer {
            tx: self.tx.downgrade(),
            status: self.status.clone(),
            capsule: self.capsule,
        }
    }

    async fn write(&self, inv: Invocation<C>) -> Result<(), CapsuleError> {
        if self.status.terminated() {
            return Err(CapsuleError::LoopTerminated {
                capsule: self.capsule,
            });
        }
        self.tx
            .send(inv)
            .await
            .map_err(|_| CapsuleError::LoopTerminated {
                capsule: self.capsule,
            })
    }
}

/// Weak counterpart of [`Synchronizer`], held by services living inside the
/// capsule (timers, self-enqueuers).
///
/// Enqueuing through it fails once the owning synchronizer has been dropped
/// or the loop has terminated; it never prevents either from happening.
pub struct WeakSynchronizer<C> {
    tx: mpsc::WeakSender<Invocation<C>>,
    status: Arc<LoopStatus>,
    capsule: &'static str,
}

impl<C> Clone for WeakSynchronizer<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            status: self.status.clone(),
            capsule: self.capsule,
        }
    }
}

impl<C: Send + 'static> WeakSynchronizer<C> {
    /// Type name of the capsule implementation behind this handle.
    pub fn capsule_name(&self) -> &'static str {
        self.capsule
    }

    /// Enqueues a loop-owned invocation (fire-and-forget), suspending while
    /// the queue is full.
    pub async fn enqueue_return<F>(&self, f: F) -> Result<(), CapsuleError>
    where
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), InvocationFailure>>
            + Send
            + 'static,
    {
        let tx = self.upgrade()?;
        let inv: Invocation<C> = Box::new(f);
        tx.send(inv).await.map_err(|_| CapsuleError::LoopTerminated {
            capsule: self.capsule,
        })
    }

    /// Blocking variant of [`enqueue_return`](Self::enqueue_return) for
    /// foreign (non-async) callback threads.
    ///
    /// Must not be called from within an async runtime; use
    /// [`enqueue_return`](Self::enqueue_return) there instead.
    pub fn enqueue_return_blocking<F>(&self, f: F) -> Result<(), CapsuleError>
    where
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), InvocationFailure>>
            + Send
            + 'static,
    {
        let tx = self.upgrade()?;
        let inv: Invocation<C> = Box::new(f);
        tx.blocking_send(inv)
            .map_err(|_| CapsuleError::LoopTerminated {
                capsule: self.capsule,
            })
    }

    fn upgrade(&self) -> Result<mpsc::Sender<Invocation<C>>, CapsuleError> {
        if self.status.terminated() {
            return Err(CapsuleError::LoopTerminated {
                capsule: self.capsule,
            });
        }
        self.tx.upgrade().ok_or(CapsuleError::LoopTerminated {
            capsule: self.capsule,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailureMode, QueueConfig};
    use crate::core::invocation_loop::InvocationLoop;
    use crate::core::queue;
    use tokio_util::sync::CancellationToken;

    struct Probe {
        hits: u32,
    }

    impl Probe {
        async fn bump(&mut self) -> u32 {
            self.hits += 1;
            self.hits
        }
    }

    fn rig(mode: FailureMode) -> (Synchronizer<Probe>, InvocationLoop<Probe>) {
        let (tx, rx) = queue::bounded(&QueueConfig::default());
        let parked = Arc::new(Mutex::new(None));
        let status = Arc::new(LoopStatus::new());
        let synchronizer = Synchronizer::new(tx, status.clone(), parked.clone());
        let looped = InvocationLoop::new(rx, Probe { hits: 0 }, parked, status, mode, None);
        (synchronizer, looped)
    }

    #[tokio::test]
    async fn await_result_round_trips_values() {
        let (sync, looped) = rig(FailureMode::Abort);
        let token = CancellationToken::new();
        let runner = tokio::spawn(looped.run(token.clone()));

        let first = sync
            .enqueue_await_result(|p: &mut Probe| p.bump().boxed())
            .await
            .unwrap();
        let second = sync
            .enqueue_await_result(|p: &mut Probe| p.bump().boxed())
            .await
            .unwrap();
        assert_eq!((first, second), (1, 2));

        token.cancel();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn await_result_round_trips_callee_errors() {
        let (sync, looped) = rig(FailureMode::Abort);
        let token = CancellationToken::new();
        let runner = tokio::spawn(looped.run(token.clone()));

        let out: Result<u32, String> = sync
            .enqueue_await_result(|_: &mut Probe| {
                async move { Err::<u32, _>("dial failed".to_string()) }.boxed()
            })
            .await
            .unwrap();
        assert_eq!(out.unwrap_err(), "dial failed");

        // The callee error went to the caller, not the loop: it still runs.
        let hits = sync
            .enqueue_await_result(|p: &mut Probe| p.bump().boxed())
            .await
            .unwrap();
        assert_eq!(hits, 1);

        token.cancel();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn await_reception_resolves_before_completion() {
        let (sync, looped) = rig(FailureMode::Abort);
        let runner = tokio::spawn(looped.run(CancellationToken::new()));

        let (gate, gate_rx) = oneshot::channel::<()>();
        sync.enqueue_await_reception(move |p: &mut Probe| {
            async move {
                p.hits += 1;
                let _ = gate_rx.await;
                p.hits += 1;
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap();

        // Reception resolved while the invocation is still blocked on the gate.
        let _ = gate.send(());
        drop(sync);
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn enqueues_fail_once_loop_terminated() {
        let (sync, looped) = rig(FailureMode::Abort);
        let token = CancellationToken::new();
        token.cancel();
        looped.run(token).await.unwrap();

        let err = sync
            .enqueue_return(|p: &mut Probe| {
                async move {
                    p.hits += 1;
                    Ok(())
                }
                .boxed()
            })
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "capsule_loop_terminated");
        assert!(err.to_string().contains("Probe"));
    }

    #[tokio::test]
    async fn pass_through_fallback_runs_inline_on_parked_state() {
        let (sync, looped) = rig(FailureMode::Abort);
        let token = CancellationToken::new();
        let runner = tokio::spawn(looped.run(token.clone()));

        let hits = sync
            .enqueue_await_result(|p: &mut Probe| p.bump().boxed())
            .await
            .unwrap();
        assert_eq!(hits, 1);

        token.cancel();
        runner.await.unwrap().unwrap();

        // Loop is gone; the hybrid contract falls back to inline execution.
        let hits = sync
            .enqueue_await_result_or_pass_through(|p: &mut Probe| p.bump().boxed())
            .await
            .unwrap();
        assert_eq!(hits, 2);
    }

    #[tokio::test]
    async fn pending_results_are_dropped_when_loop_aborts() {
        let (sync, looped) = rig(FailureMode::Abort);
        let sync = Arc::new(sync);

        sync.enqueue_return(|_: &mut Probe| {
            async move { Err(InvocationFailure::failed("poison")) }.boxed()
        })
        .await
        .unwrap();

        let caller = {
            let sync = sync.clone();
            tokio::spawn(async move {
                sync.enqueue_await_result(|p: &mut Probe| p.bump().boxed())
                    .await
            })
        };
        // Let the caller's invocation reach the queue before the loop runs.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let aborted = looped.run(CancellationToken::new()).await;
        assert!(aborted.is_err());

        let err = caller.await.unwrap().unwrap_err();
        assert_eq!(err.as_label(), "capsule_result_dropped");
    }

    #[tokio::test]
    async fn weak_handle_does_not_keep_queue_alive() {
        let (sync, looped) = rig(FailureMode::Abort);
        let weak = sync.downgrade();
        let runner = tokio::spawn(looped.run(CancellationToken::new()));

        drop(sync);
        // Only the weak handle is left, so the loop terminates on its own.
        runner.await.unwrap().unwrap();

        let err = weak
            .enqueue_return(|p: &mut Probe| {
                async move {
                    p.hits += 1;
                    Ok(())
                }
                .boxed()
            })
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "capsule_loop_terminated");
    }
}
