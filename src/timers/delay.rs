//! Delay providers for the timer service.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

/// Source of delay futures used by [`TimerService`](crate::TimerService).
///
/// The default provider never completes early; tests substitute a
/// controllable one to drive timers deterministically.
pub type DelayFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Returns the default delay provider.
///
/// It re-delays until the requested wall time has truly elapsed, so a timer
/// can never fire strictly before its nominal timeout even if the platform
/// timer wakes up coarsely.
pub fn at_least() -> DelayFn {
    Arc::new(|timeout| {
        async move {
            let start = tokio::time::Instant::now();
            tokio::time::sleep(timeout).await;
            loop {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    break;
                }
                tokio::time::sleep(timeout - elapsed).await;
            }
        }
        .boxed()
    })
}
