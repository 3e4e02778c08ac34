//! # Host: supervises all invocation loops.
//!
//! The host owns every registered [`InvocationLoop`] as a task in a
//! [`JoinSet`] and drives them to completion with a single coordinating
//! select:
//!
//! ```text
//! loop {
//!   select! {
//!     external cancellation  ──► break (then drain with grace)
//!     a loop task finished   ──► reap: Ok logged, Err/panic escalates
//!     a loop was registered  ──► spawn it with a child shutdown token
//!   }
//! }
//! ```
//!
//! ## Rules
//! - Registration is decoupled from starting: [`HostHandle::register`] only
//!   enqueues a deferred starter; the loop begins running when the host
//!   picks it up.
//! - A loop that aborts (failure mode `Abort`) or panics fails the host's
//!   own run; the embedding process should treat that as fatal.
//! - On external cancellation every loop drains its accepted work first;
//!   loops still running after [`Config::grace`] are aborted and the run
//!   ends with [`HostError::GraceExceeded`].
//! - If the registration queue closes and no loops remain, the run ends
//!   cleanly; nothing can ever be registered again.

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::Config;
use crate::core::invocation_loop::InvocationLoop;
use crate::error::{HostError, InvocationFailure};

type LoopOutcome = (&'static str, Result<(), InvocationFailure>);

struct Registration {
    capsule: &'static str,
    start: Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<(), InvocationFailure>> + Send>,
}

/// Cloneable registration handle of a [`Host`].
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::Sender<Registration>,
}

impl HostHandle {
    /// Registers an invocation loop with the host.
    ///
    /// The loop starts once the host's run picks the registration up, not at
    /// registration time. Fails with [`HostError::RegistrationFailed`] when
    /// the registration queue is full or the host is gone; both indicate a
    /// wiring error rather than a condition to retry.
    pub fn register<C: Send + 'static>(&self, looped: InvocationLoop<C>) -> Result<(), HostError> {
        let registration = Registration {
            capsule: looped.capsule_name(),
            start: Box::new(move |token| looped.run(token).boxed()),
        };
        self.tx
            .try_send(registration)
            .map_err(|_| HostError::RegistrationFailed)
    }
}

/// Owns and drives the set of live invocation loops.
///
/// Create one per runtime, hand out [`RuntimeContext`](crate::RuntimeContext)s
/// via [`context`](Host::context), and spawn [`run`](Host::run) on the async
/// runtime. The host is an explicit dependency by design: independent
/// runtimes can coexist, e.g. in tests.
pub struct Host {
    cfg: Config,
    rx: mpsc::Receiver<Registration>,
    handle: HostHandle,
    shutdown: CancellationToken,
}

impl Host {
    /// Creates a host with the given configuration.
    pub fn new(cfg: Config) -> Self {
        let (tx, rx) = mpsc::channel(cfg.registration_capacity_clamped());
        Self {
            cfg,
            rx,
            handle: HostHandle { tx },
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a cloneable registration handle.
    pub fn handle(&self) -> HostHandle {
        self.handle.clone()
    }

    /// Returns the runtime context used to encapsulate implementations into
    /// capsules wired to this host.
    pub fn context(&self) -> crate::context::RuntimeContext {
        crate::context::RuntimeContext::new(self.handle.clone(), self.cfg.clone())
    }

    /// Runs until `token` is cancelled, escalating loop failures.
    ///
    /// Returns `Ok(())` after a clean shutdown: all loops drained their
    /// accepted work within [`Config::grace`]. Also returns `Ok(())` once
    /// every registration handle is dropped and every loop finished on its
    /// own, since nothing can ever be registered again. Obtain handles and
    /// contexts before calling this; `run` consumes the host.
    pub async fn run(self, token: CancellationToken) -> Result<(), HostError> {
        let Self {
            cfg,
            mut rx,
            handle,
            shutdown,
        } = self;
        // The host's own handle must not hold the registration queue open.
        drop(handle);

        let mut loops: JoinSet<LoopOutcome> = JoinSet::new();
        let mut accepting = true;

        loop {
            if !accepting && loops.is_empty() {
                break;
            }

            debug!("host awaiting loop termination or new registration");
            tokio::select! {
                _ = token.cancelled() => break,
                joined = loops.join_next(), if !loops.is_empty() => {
                    if let Some(outcome) = joined {
                        Self::reap(outcome)?;
                    }
                }
                registration = rx.recv(), if accepting => match registration {
                    Some(registration) => Self::start_loop(&shutdown, &mut loops, registration),
                    None => accepting = false,
                },
            }
        }

        shutdown.cancel();
        Self::drain(cfg.grace, &mut loops).await
    }

    fn start_loop(
        shutdown: &CancellationToken,
        loops: &mut JoinSet<LoopOutcome>,
        registration: Registration,
    ) {
        let Registration { capsule, start } = registration;
        debug!(capsule, "starting invocation loop");
        let running = start(shutdown.child_token());
        loops.spawn(async move { (capsule, running.await) });
    }

    /// Awaits remaining loops within the grace period, then aborts stragglers.
    async fn drain(
        grace: std::time::Duration,
        loops: &mut JoinSet<LoopOutcome>,
    ) -> Result<(), HostError> {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, loops.join_next()).await {
                Ok(Some(outcome)) => Self::reap(outcome)?,
                Ok(None) => return Ok(()),
                Err(_) => {
                    error!(?grace, "shutdown grace exceeded, aborting remaining loops");
                    loops.abort_all();
                    return Err(HostError::GraceExceeded { grace });
                }
            }
        }
    }

    fn reap(outcome: Result<LoopOutcome, JoinError>) -> Result<(), HostError> {
        match outcome {
            Ok((capsule, Ok(()))) => {
                debug!(capsule, "invocation loop finished");
                Ok(())
            }
            Ok((capsule, Err(failure))) => {
                error!(capsule, error = %failure, "invocation loop aborted");
                Err(HostError::LoopAborted {
                    capsule,
                    source: failure,
                })
            }
            Err(join) if join.is_cancelled() => Ok(()),
            Err(join) => Err(HostError::LoopPanicked {
                detail: join.to_string(),
            }),
        }
    }
}
