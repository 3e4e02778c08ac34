//! Core runtime: invocation queue, loop, synchronizer, and host.

mod host;
mod invocation_loop;
mod queue;
mod status;
mod synchronizer;

pub use host::{Host, HostHandle};
pub use invocation_loop::InvocationLoop;
pub use queue::Invocation;
pub use status::LoopStatus;
pub use synchronizer::{Synchronization, Synchronizer, WeakSynchronizer};

pub(crate) use queue::bounded;
