//! # Runtime configuration.
//!
//! Provides [`Config`], the centralized settings for a capsule runtime, plus
//! the per-queue [`QueueConfig`] and the [`FailureMode`] policy.
//!
//! Config is used in two ways:
//! 1. **Host creation**: `Host::new(config)`
//! 2. **Per-capsule overrides**: `ctx.capsule(imp).with_queue(..).with_failure_mode(..)`
//!
//! ## Sentinel values
//! - `queue.capacity = 0` and `registration_capacity = 0` are clamped to 1
//! - `grace = 0s` means "abort straggling loops immediately on shutdown"

use std::time::Duration;

/// How an invocation loop reacts to an invocation failure, i.e. an error
/// returned by a loop-owned invocation (fire-and-forget calls, timer
/// callbacks, the initializer).
///
/// Failures of await-completion calls are never subject to this policy; they
/// travel back to the caller that awaits the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureMode {
    /// Log the failed invocation, then continue with the next one.
    /// The loop itself never fails.
    Continue,

    /// Log the failed invocation, then abort the loop. Pending invocations
    /// are not processed anymore, and the failure escalates through
    /// [`Host::run`](crate::Host::run) as
    /// [`HostError::LoopAborted`](crate::HostError::LoopAborted).
    Abort,
}

impl Default for FailureMode {
    /// Defaults to [`FailureMode::Abort`]: an unhandled fault in a capsule is
    /// made loud rather than silently swallowed.
    fn default() -> Self {
        FailureMode::Abort
    }
}

/// Settings for one capsule's invocation queue.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Maximum number of enqueued-but-not-yet-executed invocations.
    ///
    /// When the queue is full, producers suspend until space is available.
    /// Invocations are never dropped and a full queue is never an error;
    /// enqueuing only fails once the queue has been closed.
    pub capacity: usize,
}

impl QueueConfig {
    /// Returns the capacity clamped to a minimum of 1.
    #[inline]
    pub fn capacity_clamped(&self) -> usize {
        self.capacity.max(1)
    }
}

impl Default for QueueConfig {
    /// Defaults to a capacity of 1023 invocations.
    fn default() -> Self {
        Self { capacity: 1023 }
    }
}

/// Global configuration for a capsule runtime.
///
/// ## Field semantics
/// - `queue`: default invocation queue settings, overridable per capsule
/// - `registration_capacity`: size of the host's loop registration queue;
///   overflowing it is a wiring error, not a runtime condition to tolerate
/// - `failure_mode`: default failure policy, overridable per capsule
/// - `grace`: how long [`Host::run`](crate::Host::run) waits for invocation
///   loops to drain after the external cancellation signal fires
#[derive(Clone, Debug)]
pub struct Config {
    /// Default invocation queue settings for new capsules.
    pub queue: QueueConfig,

    /// Capacity of the host's registration queue.
    ///
    /// Registrations never block; a full or closed registration queue makes
    /// [`HostHandle::register`](crate::HostHandle::register) fail with
    /// [`HostError::RegistrationFailed`](crate::HostError::RegistrationFailed).
    pub registration_capacity: usize,

    /// Default failure mode for new invocation loops.
    pub failure_mode: FailureMode,

    /// Maximum time to wait for loops to drain accepted work during shutdown.
    ///
    /// When the external cancellation token fires, every loop finishes its
    /// already-accepted invocations first. Loops still running after `grace`
    /// are aborted and the host returns
    /// [`HostError::GraceExceeded`](crate::HostError::GraceExceeded).
    pub grace: Duration,
}

impl Config {
    /// Returns the registration queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn registration_capacity_clamped(&self) -> usize {
        self.registration_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `queue.capacity = 1023`
    /// - `registration_capacity = 1023`
    /// - `failure_mode = FailureMode::Abort`
    /// - `grace = 60s`
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            registration_capacity: 1023,
            failure_mode: FailureMode::default(),
            grace: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.queue.capacity, 1023);
        assert_eq!(cfg.registration_capacity, 1023);
        assert_eq!(cfg.failure_mode, FailureMode::Abort);
        assert_eq!(cfg.grace, Duration::from_secs(60));
    }

    #[test]
    fn capacities_are_clamped() {
        let cfg = Config {
            queue: QueueConfig { capacity: 0 },
            registration_capacity: 0,
            ..Config::default()
        };
        assert_eq!(cfg.queue.capacity_clamped(), 1);
        assert_eq!(cfg.registration_capacity_clamped(), 1);
    }
}
