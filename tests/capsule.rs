//! End-to-end tests driving capsules through a hand-written facade, the way
//! generated or hand-rolled forwarding code would in production.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use capvisor::{
    CapsuleError, Config, Host, Initializer, InvocationFailure, Synchronizer, TimerService, Timers,
};

/// The protected implementation: plain state, no locking, an await point in
/// the middle of every mutation to invite interleaving bugs.
struct Counter {
    value: u32,
    timers: Option<TimerService<Counter>>,
    fired_after: Vec<Duration>,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: 0,
            timers: None,
            fired_after: Vec::new(),
        }
    }

    async fn increment(&mut self) -> u32 {
        let read = self.value;
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.value = read + 1;
        self.value
    }
}

#[async_trait]
impl Initializer for Counter {
    async fn initialize(&mut self) -> Result<(), InvocationFailure> {
        self.value = 10;
        Ok(())
    }
}

impl Timers for Counter {
    fn timers_slot(&mut self) -> &mut Option<TimerService<Counter>> {
        &mut self.timers
    }
}

/// Hand-written facade: one method per operation, each forwarding under its
/// declared synchronization contract.
struct CounterCapsule {
    label: &'static str,
    sync: Synchronizer<Counter>,
}

impl CounterCapsule {
    /// AwaitCompletion: full round-trip, the incremented value comes back.
    async fn increment(&self) -> Result<u32, CapsuleError> {
        self.sync
            .enqueue_await_result(|c: &mut Counter| c.increment().boxed())
            .await
    }

    /// AwaitReception: resumes once the increment has started.
    async fn increment_acked(&self) -> Result<(), CapsuleError> {
        self.sync
            .enqueue_await_reception(|c: &mut Counter| {
                async move {
                    c.increment().await;
                    Ok(())
                }
                .boxed()
            })
            .await
    }

    /// AwaitEnqueueing: fire-and-forget.
    async fn increment_queued(&self) -> Result<(), CapsuleError> {
        self.sync
            .enqueue_return(|c: &mut Counter| {
                async move {
                    c.increment().await;
                    Ok(())
                }
                .boxed()
            })
            .await
    }

    /// AwaitCompletion read of the current value.
    async fn value(&self) -> Result<u32, CapsuleError> {
        self.sync
            .enqueue_await_result(|c: &mut Counter| async move { c.value }.boxed())
            .await
    }

    /// AwaitCompletionOrPassThroughIfQueueClosed: still readable after the
    /// runtime shut down.
    async fn value_or_inline(&self) -> Result<u32, CapsuleError> {
        self.sync
            .enqueue_await_result_or_pass_through(|c: &mut Counter| async move { c.value }.boxed())
            .await
    }

    /// PassThrough: immutable facade-held state, queue bypassed.
    fn label(&self) -> &'static str {
        self.sync.pass_through(|| self.label)
    }
}

fn start_runtime() -> (
    capvisor::RuntimeContext,
    CancellationToken,
    tokio::task::JoinHandle<Result<(), capvisor::HostError>>,
) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let host = Host::new(Config::default());
    let ctx = host.context();
    let token = CancellationToken::new();
    let runner = tokio::spawn(host.run(token.clone()));
    (ctx, token, runner)
}

#[tokio::test]
async fn mixed_contracts_observe_one_sequential_order() {
    let (ctx, token, runner) = start_runtime();
    let capsule = CounterCapsule {
        label: "counter",
        sync: ctx
            .capsule(Counter::new())
            .with_initializer()
            .encapsulate()
            .unwrap(),
    };

    assert_eq!(capsule.label(), "counter");

    // One producer task: admissions happen in program order, so the values
    // the await-completion calls return are exactly the strict increment
    // sequence after the initializer's 10.
    capsule.increment_queued().await.unwrap(); // -> 11
    capsule.increment_acked().await.unwrap(); // -> 12
    capsule.increment_queued().await.unwrap(); // -> 13
    assert_eq!(capsule.increment().await.unwrap(), 14);
    assert_eq!(capsule.increment().await.unwrap(), 15);
    assert_eq!(capsule.value().await.unwrap(), 15);

    token.cancel();
    runner.await.unwrap().unwrap();

    // The runtime is gone: plain calls fail, the hybrid contract reads the
    // parked state inline.
    assert!(matches!(
        capsule.value().await,
        Err(CapsuleError::LoopTerminated { .. })
    ));
    assert_eq!(capsule.value_or_inline().await.unwrap(), 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_interleave_mutations() {
    let (ctx, token, runner) = start_runtime();
    let capsule = Arc::new(CounterCapsule {
        label: "counter",
        sync: ctx.encapsulate(Counter::new()).unwrap(),
    });

    let mut callers = Vec::new();
    for _ in 0..4 {
        let capsule = capsule.clone();
        callers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..25 {
                seen.push(capsule.increment().await.unwrap());
            }
            seen
        }));
    }

    for caller in callers {
        let seen = caller.await.unwrap();
        // Within one caller's own submissions the returned values are
        // strictly increasing: no lost or interleaved updates.
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    // Every one of the 100 read-sleep-write increments took effect.
    assert_eq!(capsule.value().await.unwrap(), 100);

    token.cancel();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn timers_fire_through_the_capsule_and_never_early() {
    let (ctx, token, runner) = start_runtime();
    let timeout = Duration::from_millis(40);
    let capsule = CounterCapsule {
        label: "counter",
        sync: ctx
            .capsule(Counter::new())
            .with_timers()
            .encapsulate()
            .unwrap(),
    };

    // Schedule several timers from inside the capsule, each recording how
    // long after its start it actually ran.
    for _ in 0..5 {
        capsule
            .sync
            .enqueue_await_result(move |c: &mut Counter| {
                async move {
                    let started = std::time::Instant::now();
                    let timers = c.timers_slot().as_mut().expect("timers injected");
                    timers.start_single_shot(
                        timeout,
                        move |c: &mut Counter| {
                            async move {
                                c.fired_after.push(started.elapsed());
                                Ok(())
                            }
                            .boxed()
                        },
                        None,
                    );
                }
                .boxed()
            })
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let fired_after = capsule
        .sync
        .enqueue_await_result(|c: &mut Counter| async move { c.fired_after.clone() }.boxed())
        .await
        .unwrap();
    assert_eq!(fired_after.len(), 5);
    for elapsed in fired_after {
        assert!(elapsed >= timeout, "timer fired early: {elapsed:?}");
    }

    token.cancel();
    runner.await.unwrap().unwrap();
}
