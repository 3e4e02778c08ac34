//! Handle to one scheduled timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A reference to a timer registered for delayed execution. Its main purpose
/// is to allow cancelling the timer before it fires.
///
/// Cloning yields another handle to the same timer.
#[derive(Clone, Debug)]
pub struct TimerReference {
    timeout: Duration,
    discriminator: Option<String>,
    token: CancellationToken,
    completed: Arc<AtomicBool>,
}

impl TimerReference {
    pub(crate) fn new(timeout: Duration, discriminator: Option<String>) -> Self {
        Self {
            timeout,
            discriminator,
            token: CancellationToken::new(),
            completed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The nominal timeout this timer was started with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The discriminator used for duplicate detection, if any.
    pub fn discriminator(&self) -> Option<&str> {
        self.discriminator.as_deref()
    }

    /// Cancels this timer. A no-op if the timer already fired and its
    /// callback has been enqueued.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn completed_flag(&self) -> Arc<AtomicBool> {
        self.completed.clone()
    }

    /// The delay task has finished, i.e. the timer fired, was cancelled, or
    /// its capsule went away. Bookkeeping removal happens afterwards, from
    /// the capsule's own serialized cleanup invocation.
    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}
