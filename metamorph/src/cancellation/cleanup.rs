//! Guaranteed cleanup around async operations.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Runs `operation`, then always runs `cleanup` under a deadline.
///
/// The operation's result is returned unchanged whether it succeeded or
/// failed. A cleanup that overruns its deadline is abandoned with a warning.
pub async fn run_with_cleanup<T, E, Fut, C, CFut>(
    operation: Fut,
    cleanup: C,
    cleanup_timeout: Duration,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    C: FnOnce() -> CFut,
    CFut: Future<Output = ()>,
{
    let result = operation.await;

    if tokio::time::timeout(cleanup_timeout, cleanup()).await.is_err() {
        warn!("Cleanup timed out after {}s", cleanup_timeout.as_secs_f64());
    }

    result
}

/// Runs a closure when dropped unless disarmed.
///
/// Covers the path where the owning future is dropped before it reaches
/// its explicit cleanup, e.g. when a deadline fires.
pub struct DropGuard<F: FnOnce()> {
    callback: Option<F>,
}

impl<F: FnOnce()> DropGuard<F> {
    /// Arms a guard.
    pub const fn new(callback: F) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// Disarms the guard so dropping it does nothing.
    pub fn disarm(&mut self) {
        self.callback = None;
    }
}

impl<F: FnOnce()> Drop for DropGuard<F> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

impl<F: FnOnce()> std::fmt::Debug for DropGuard<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropGuard")
            .field("armed", &self.callback.is_some())
            .finish()
    }
}
