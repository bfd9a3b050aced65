use std::future::Future;

use anyhow::Result;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Owns every background task spawned for webhook deliveries.
#[derive(Clone, Default)]
pub struct Supervisor {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl Supervisor {
    pub fn new() -> Self { Self::default() }

    /// Fired on shutdown; long-running tasks select on it.
    pub fn token(&self) -> CancellationToken { self.token.clone() }

    pub fn spawn<F>(&self, name: &'static str, task: F)
    where F: Future<Output = Result<()>> + Send + 'static {
        self.tracker.spawn(async move {
            if let Err(e) = task.await {
                tracing::error!("Task {} failed: {:?}", name, e);
            }
        });
    }

    pub fn len(&self) -> usize { self.tracker.len() }

    pub fn is_empty(&self) -> bool { self.tracker.is_empty() }

    /// Wait for every task spawned so far, then accept new tasks again.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel running tasks and wait for them to report.
    pub async fn shutdown(&self) {
        tracing::info!("Cancelling {} background tasks", self.tracker.len());
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
