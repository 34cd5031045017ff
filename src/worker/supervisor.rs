//! Restart loop for long-running tasks

use crate::error::RelayerResult;
use crate::metrics;

use std::future::Future;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, warn};

/// Aborts the running attempt when the supervising task is dropped
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `factory()` as a task forever, restarting it after `cooldown` whenever
/// it returns, fails or panics. Aborting the returned handle stops the loop
/// and the attempt currently running.
pub fn spawn_supervised<F, Fut>(name: String, cooldown: Duration, factory: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RelayerResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let attempt = tokio::spawn(factory());
            let _guard = AbortOnDrop(attempt.abort_handle());
            match attempt.await {
                Ok(Ok(())) => warn!("Task {} exited, restarting", name),
                Ok(Err(e)) => error!("Task {} failed: {}", name, e),
                Err(e) if e.is_panic() => error!("Task {} panicked", name),
                Err(_) => break,
            }
            metrics::record_task_restart(&name);
            tokio::time::sleep(cooldown).await;
        }
    })
}
