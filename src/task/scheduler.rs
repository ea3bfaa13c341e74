//! Delayed and repeating background work, cancellable as a hierarchy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A handle to one scheduled unit of work. Dropping the handle does not
/// cancel the task; call `cancel` explicitly, or cancel an ancestor
/// token to bring down every task derived from it at once.
pub struct Task {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl Task {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawns a hierarchy of cancellable background tasks. Every task
/// scheduled through one `Scheduler` shares (a child of) the same root
/// token, so shutting the router down cancels all of them together.
pub struct Scheduler {
    root: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
        }
    }

    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Runs `run` once after `delay`, unless cancelled first.
    pub fn delay<F, Fut>(&self, delay: Duration, run: F) -> Task
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.root.child_token();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => run().await,
                _ = task_token.cancelled() => trace!("delayed task cancelled before firing"),
            }
        });
        Task { token, handle }
    }

    /// Runs `run` every `period`, starting after the first `period`
    /// elapses, until cancelled.
    pub fn repeat<F, Fut>(self: &Arc<Self>, period: Duration, run: F) -> Task
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.root.child_token();
        let task_token = token.clone();
        let run = Arc::new(run);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = interval.tick() => (run)().await,
                    _ = task_token.cancelled() => {
                        trace!("repeating task cancelled");
                        break;
                    }
                }
            }
        });
        Task { token, handle }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
