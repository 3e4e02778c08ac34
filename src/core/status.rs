//! Loop status flag shared between an invocation loop and its synchronizer.

use std::sync::atomic::{AtomicBool, Ordering};

/// Thread-safe, write-once signal that an invocation loop has exited.
///
/// The loop sets the flag on every exit path (clean close, cancellation
/// drain, abort). The synchronizer reads it to fail fast on enqueues and to
/// decide pass-through fallbacks.
#[derive(Debug, Default)]
pub struct LoopStatus {
    terminated: AtomicBool,
}

impl LoopStatus {
    /// Creates a status flag in the not-terminated state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the owning loop has exited.
    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn set_terminated(&self) {
        self.terminated.store(true, Ordering::Release);
    }
}
