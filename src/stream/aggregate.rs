//! First-failure aggregation over concurrent copy tasks.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::CourierError;
use crate::Result;

type Outcome = (&'static str, Result<()>);

/// Collects the results of a fixed number of spawned tasks.
///
/// The completion channel is sized to the task count, so a finishing task
/// never waits on the collector. End-of-stream errors count as success;
/// the first other error wins and later ones are discarded. Tasks still
/// running when the aggregator is dropped are aborted.
pub struct ErrorAggregator {
    tx: Option<mpsc::Sender<Outcome>>,
    rx: mpsc::Receiver<Outcome>,
    capacity: usize,
    handles: Vec<AbortHandle>,
}

impl ErrorAggregator {
    /// Create an aggregator for `capacity` tasks.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Some(tx),
            rx,
            capacity,
            handles: Vec::with_capacity(capacity),
        }
    }

    /// Spawn a named task whose result is collected by [`wait`](Self::wait).
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        debug_assert!(
            self.handles.len() < self.capacity,
            "more tasks than the completion channel was sized for"
        );
        let Some(tx) = self.tx.clone() else {
            return;
        };
        let handle = tokio::spawn(async move {
            let result = task.await;
            let _ = tx.send((name, result)).await;
        });
        self.handles.push(handle.abort_handle());
    }

    /// Number of tasks spawned so far.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no task has been spawned.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task, returning the first non-benign error.
    ///
    /// Returns early on that error; the remaining tasks are aborted.
    pub async fn wait(mut self) -> Result<()> {
        // Only the task clones keep the channel open from here on
        self.tx = None;

        for _ in 0..self.handles.len() {
            match self.rx.recv().await {
                Some((name, Ok(()))) => debug!("{} task finished", name),
                Some((name, Err(e))) if e.is_end_of_stream() => {
                    debug!("{} task reached end of stream: {}", name, e);
                }
                Some((name, Err(e))) => {
                    debug!("{} task failed: {}", name, e);
                    return Err(e);
                }
                // A task panicked or was aborted without reporting
                None => {
                    return Err(CourierError::Io(std::io::Error::other(
                        "copy task ended without reporting",
                    )))
                }
            }
        }
        Ok(())
    }
}

impl Drop for ErrorAggregator {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    fn copy_err(kind: io::ErrorKind) -> CourierError {
        CourierError::Copy {
            stream: "stdout",
            source: io::Error::new(kind, "test"),
        }
    }

    #[tokio::test]
    async fn test_all_success() {
        let mut tasks = ErrorAggregator::new(3);
        for _ in 0..3 {
            tasks.spawn("noop", async { Ok(()) });
        }
        assert_eq!(tasks.len(), 3);
        assert!(tasks.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_end_of_stream_is_success() {
        let mut tasks = ErrorAggregator::new(2);
        tasks.spawn("stdin", async { Err(copy_err(io::ErrorKind::BrokenPipe)) });
        tasks.spawn("stdout", async { Err(copy_err(io::ErrorKind::UnexpectedEof)) });
        assert!(tasks.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_first_real_error_wins() {
        let mut tasks = ErrorAggregator::new(3);
        tasks.spawn("first", async { Err(copy_err(io::ErrorKind::PermissionDenied)) });
        tasks.spawn("second", async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(CourierError::NotConnected)
        });
        tasks.spawn("ok", async { Ok(()) });

        let err = tasks.wait().await.unwrap_err();
        assert!(matches!(err, CourierError::Copy { .. }));
    }

    #[tokio::test]
    async fn test_empty_aggregator() {
        let tasks = ErrorAggregator::new(0);
        assert!(tasks.is_empty());
        assert!(tasks.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_aborts_pending_tasks() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let mut tasks = ErrorAggregator::new(1);
        tasks.spawn("hung", async move {
            let _keep = tx;
            std::future::pending::<()>().await;
            Ok(())
        });
        drop(tasks);

        // The aborted task drops its sender, closing the channel
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }
}
