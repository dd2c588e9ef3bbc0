//! ---
//! cosim_section: "01-core-functionality"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Runtime helpers supporting bus and federate loops."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::future::Future;

use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

/// Receiving half of a task's stop signal. Resolves when the owning
/// [`TaskHandle`] is stopped or dropped.
pub type ShutdownRx = oneshot::Receiver<()>;

/// Handle to a spawned background loop with an explicit stop-and-join contract.
#[derive(Debug)]
pub struct TaskHandle<T> {
    name: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<T>,
}

impl<T> TaskHandle<T>
where
    T: Send + 'static,
{
    /// Spawn `body` on the current tokio runtime, handing it the stop signal.
    pub fn spawn<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(ShutdownRx) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(body(shutdown_rx));
        Self {
            name: name.into(),
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for its current iteration to finish.
    pub async fn stop(mut self) -> Result<T, JoinError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        debug!(task = %self.name, "stop requested; joining");
        self.task.await
    }

    /// Wait for the loop to finish on its own.
    pub async fn join(self) -> Result<T, JoinError> {
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_joins_after_signal() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = iterations.clone();
        let handle = TaskHandle::spawn("counter", move |mut shutdown| async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(Duration::from_millis(1)) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            "stopped"
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let outcome = handle.stop().await.expect("task joins");
        assert_eq!(outcome, "stopped");
        let seen = iterations.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(iterations.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn join_waits_for_natural_completion() {
        let handle = TaskHandle::spawn("one-shot", |_shutdown| async { 7 });
        assert_eq!(handle.join().await.expect("joins"), 7);
    }
}
