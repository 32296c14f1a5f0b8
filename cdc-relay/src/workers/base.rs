use std::future::Future;

use crate::error::RelayResult;

/// A trait for types that can be started as background workers.
///
/// `H` is the handle returned once the worker runs and `S` the state observable through it.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type.
    type Error;

    /// Spawns the worker and returns a handle to control it.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// A handle to a running worker.
pub trait WorkerHandle<S> {
    /// Returns the state of the worker.
    ///
    /// The state is not tied to the lifetime of the worker, holding it says nothing about
    /// whether the worker is still running.
    fn state(&self) -> S;

    /// Returns a future that resolves when the worker completes.
    fn wait(self) -> impl Future<Output = RelayResult<()>> + Send;
}
