//! Event lifetime extension.

use std::future::Future;

use tokio::task::JoinSet;
use tracing::warn;

/// Work an event still owns after its response has been delivered.
///
/// The host awaits [`WaitUntil::settled`] before treating the event as
/// finished. Dropping the handle aborts whatever is still outstanding, the
/// same way a terminated worker loses its in-flight work.
#[derive(Default)]
pub struct WaitUntil {
    tasks: JoinSet<()>,
}

impl WaitUntil {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the event's lifetime over `task`.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Number of tasks not yet joined.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every extended task to finish.
    pub async fn settled(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Extended task did not complete");
            }
        }
    }
}

impl std::fmt::Debug for WaitUntil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitUntil")
            .field("pending", &self.tasks.len())
            .finish()
    }
}
