//! # Invocation loop: the single consumer of one capsule's queue.
//!
//! The loop owns the capsule implementation and executes invocations one at
//! a time, which is the run-to-completion guarantee the whole runtime exists
//! for: within one capsule there is never more than one invocation in flight.
//!
//! ## State machine
//! ```text
//! Running ──(cancellation signal)──► Draining ──► Terminated
//! Running ──(queue closed by owner)─────────────► Terminated
//! Running ──(failure, Abort mode)───────────────► Aborted (run returns Err)
//! ```
//!
//! ## Rules
//! - Cancellation interrupts the **wait for work**, never an in-flight
//!   invocation.
//! - After any wakeup the loop drains everything already enqueued before
//!   waiting again, including after the shutdown signal: accepted work is
//!   never silently dropped. The host bounds this with its grace timeout.
//! - A closed queue (the owning synchronizer was dropped) ends the loop
//!   without error; that is the teardown path for capsules nobody
//!   references anymore.
//! - On every exit path the capsule state is parked in the shared slot and
//!   the status flag is set, in that order, so pass-through fallbacks never
//!   observe a terminated loop without parked state.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::FailureMode;
use crate::core::queue::Invocation;
use crate::core::status::LoopStatus;
use crate::error::InvocationFailure;

/// Sole consumer of one capsule's invocation queue.
///
/// Constructed during encapsulation and handed to
/// [`HostHandle::register`](crate::HostHandle::register); the host starts
/// [`run`](InvocationLoop::run) once it picks the registration up.
pub struct InvocationLoop<C> {
    rx: mpsc::Receiver<Invocation<C>>,
    imp: C,
    parked: Arc<Mutex<Option<C>>>,
    status: Arc<LoopStatus>,
    mode: FailureMode,
    capsule: &'static str,
    first: Option<Invocation<C>>,
}

impl<C: Send + 'static> InvocationLoop<C> {
    pub(crate) fn new(
        rx: mpsc::Receiver<Invocation<C>>,
        imp: C,
        parked: Arc<Mutex<Option<C>>>,
        status: Arc<LoopStatus>,
        mode: FailureMode,
        first: Option<Invocation<C>>,
    ) -> Self {
        Self {
            rx,
            imp,
            parked,
            status,
            mode,
            capsule: std::any::type_name::<C>(),
            first,
        }
    }

    /// Type name of the capsule implementation this loop serves.
    pub fn capsule_name(&self) -> &'static str {
        self.capsule
    }

    /// Runs the loop until the queue closes, the cancellation signal fires
    /// and the queue is drained, or (under [`FailureMode::Abort`]) an
    /// invocation fails.
    ///
    /// The returned error is the failure that aborted the loop; the host
    /// escalates it. Whatever the exit path, the capsule state has been
    /// parked and the status flag set by the time this returns.
    pub async fn run(self, token: CancellationToken) -> Result<(), InvocationFailure> {
        let Self {
            mut rx,
            mut imp,
            parked,
            status,
            mode,
            capsule,
            first,
        } = self;

        let mut outcome = Ok(());
        if let Some(inv) = first {
            outcome = Self::execute(&mut imp, inv, mode, capsule).await;
        }
        if outcome.is_ok() {
            outcome = Self::process(&mut rx, &mut imp, mode, capsule, &token).await;
        }

        parked.lock().await.replace(imp);
        status.set_terminated();
        debug!(capsule, "invocation loop terminated");
        outcome
    }

    async fn process(
        rx: &mut mpsc::Receiver<Invocation<C>>,
        imp: &mut C,
        mode: FailureMode,
        capsule: &'static str,
        token: &CancellationToken,
    ) -> Result<(), InvocationFailure> {
        loop {
            let woken_by_work = tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(inv) => {
                        Self::execute(imp, inv, mode, capsule).await?;
                        true
                    }
                    None => {
                        debug!(capsule, "invocation queue closed, terminating loop");
                        return Ok(());
                    }
                },
                _ = token.cancelled() => false,
            };

            // Consume everything already accepted, even when we have been
            // cancelled; the host's grace timeout bounds this.
            while let Ok(inv) = rx.try_recv() {
                Self::execute(imp, inv, mode, capsule).await?;
            }

            if token.is_cancelled() {
                debug!(capsule, woken_by_work, "cancellation observed, queue drained");
                return Ok(());
            }
        }
    }

    async fn execute(
        imp: &mut C,
        inv: Invocation<C>,
        mode: FailureMode,
        capsule: &'static str,
    ) -> Result<(), InvocationFailure> {
        match inv(imp).await {
            Ok(()) => Ok(()),
            Err(failure) if failure.is_cancellation() => {
                warn!(capsule, "a loop-owned invocation was cancelled");
                Ok(())
            }
            Err(failure) => {
                error!(capsule, error = %failure, "invocation failed inside loop");
                match mode {
                    FailureMode::Continue => Ok(()),
                    FailureMode::Abort => Err(failure),
                }
            }
        }
    }
}
