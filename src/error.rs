//! Error types used by the capsule runtime.
//!
//! This module defines three error enums, one per failure surface:
//!
//! - [`CapsuleError`] — enqueue errors surfaced synchronously to callers.
//! - [`InvocationFailure`] — errors produced by capsule logic while an
//!   invocation runs inside its loop, owned by the loop's failure mode.
//! - [`HostError`] — failures of the host's own run, including escalated
//!   loop aborts.
//!
//! All types provide `as_label()` helpers returning short stable snake_case
//! labels for logs and metrics.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to a caller at the enqueue site.
///
/// These never describe a failure of capsule logic; an await-completion
/// caller receives its capsule method's own `Result` back unchanged.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CapsuleError {
    /// The invocation loop has terminated (or its queue is closed), so the
    /// invocation cannot be enqueued.
    #[error("unable to enqueue invocation for capsule `{capsule}`: invocation loop has terminated")]
    LoopTerminated {
        /// Type name of the capsule implementation.
        capsule: &'static str,
    },

    /// The invocation was accepted but its loop went away before running it
    /// to completion, e.g. because the loop aborted on an earlier failure.
    #[error("invocation for capsule `{capsule}` was dropped before it completed")]
    ResultDropped {
        /// Type name of the capsule implementation.
        capsule: &'static str,
    },
}

impl CapsuleError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use capvisor::CapsuleError;
    ///
    /// let err = CapsuleError::LoopTerminated { capsule: "Tracker" };
    /// assert_eq!(err.as_label(), "capsule_loop_terminated");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            CapsuleError::LoopTerminated { .. } => "capsule_loop_terminated",
            CapsuleError::ResultDropped { .. } => "capsule_result_dropped",
        }
    }
}

/// A failure of a loop-owned invocation.
///
/// Loop-owned invocations are those with no caller awaiting their result:
/// fire-and-forget calls, the tail of await-reception calls, timer callbacks
/// and the initializer. Their errors end up here and are handled by the
/// loop's [`FailureMode`](crate::FailureMode).
///
/// Cancellation is deliberately a separate variant: it is logged as a warning
/// and never escalates, regardless of failure mode.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InvocationFailure {
    /// The invocation was cancelled while running.
    #[error("invocation was cancelled")]
    Canceled,

    /// The invocation returned an error.
    #[error("invocation failed: {source}")]
    Failed {
        /// The underlying error produced by capsule logic.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl InvocationFailure {
    /// Wraps an arbitrary error as a loop-owned invocation failure.
    pub fn failed(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        InvocationFailure::Failed {
            source: source.into(),
        }
    }

    /// Returns `true` for [`InvocationFailure::Canceled`].
    ///
    /// Cancellation is logged at `warn` and never aborts a loop.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, InvocationFailure::Canceled)
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            InvocationFailure::Canceled => "invocation_canceled",
            InvocationFailure::Failed { .. } => "invocation_failed",
        }
    }
}

/// Failures of the host run itself.
///
/// A host failure is terminal for the whole runtime: it is the embedding
/// process's cue to crash or escalate rather than continue with a partially
/// dead set of capsules.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HostError {
    /// An invocation loop aborted (failure mode [`Abort`](crate::FailureMode::Abort)).
    #[error("invocation loop for capsule `{capsule}` aborted: {source}")]
    LoopAborted {
        /// Type name of the capsule whose loop aborted.
        capsule: &'static str,
        /// The invocation failure that triggered the abort.
        #[source]
        source: InvocationFailure,
    },

    /// An invocation loop task panicked.
    #[error("an invocation loop panicked: {detail}")]
    LoopPanicked {
        /// Panic description as reported by the join error.
        detail: String,
    },

    /// The host's registration queue is full or closed.
    ///
    /// This indicates a wiring error (undersized registration queue, or
    /// registering against a host that already shut down), not a transient
    /// runtime condition.
    #[error("invocation loop registration queue is full or closed")]
    RegistrationFailed,

    /// Loops were still running after the shutdown grace period elapsed.
    #[error("shutdown grace period {grace:?} exceeded; remaining invocation loops were aborted")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
    },
}

impl HostError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use capvisor::HostError;
    ///
    /// let err = HostError::GraceExceeded { grace: Duration::from_secs(5) };
    /// assert_eq!(err.as_label(), "host_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            HostError::LoopAborted { .. } => "host_loop_aborted",
            HostError::LoopPanicked { .. } => "host_loop_panicked",
            HostError::RegistrationFailed => "host_registration_failed",
            HostError::GraceExceeded { .. } => "host_grace_exceeded",
        }
    }
}
