use std::future::Future;

use tokio::sync::mpsc;

/// Set of detached echo tasks with a drain barrier.
///
/// Every spawned task holds a clone of `guard`. Dropping the owner's copy and
/// waiting for the channel to report disconnection waits for all of them.
pub struct EchoTasks {
    guard: mpsc::Sender<()>,
    done: mpsc::Receiver<()>,
}

impl EchoTasks {
    pub fn new() -> Self {
        let (guard, done) = mpsc::channel(1);
        Self { guard, done }
    }

    /// Spawns `task` on the current monoio runtime. It is never cancelled.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let guard = self.guard.clone();
        monoio::spawn(async move {
            task.await;
            drop(guard);
        });
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn outstanding(&self) -> usize {
        self.guard.strong_count() - 1
    }

    /// Waits for every spawned task to finish.
    pub async fn drain(self) {
        let pending = self.outstanding();
        let Self { guard, mut done } = self;
        drop(guard);
        if pending > 0 {
            tracing::info!(pending, "Waiting for outstanding echo tasks");
        }
        while done.recv().await.is_some() {}
    }
}

impl Default for EchoTasks {
    fn default() -> Self {
        Self::new()
    }
}
