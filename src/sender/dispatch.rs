use super::stats::PublishStats;
use super::task::PublishTask;
use crate::broker::{ConnectionManager, Connector, Route};
use crate::domain::AppenderError;
use crate::reliability::ErrorSink;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Unbounded FIFO in front of the worker. Submitting never waits on the network.
pub struct DispatchQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<PublishTask>>>,
    stats: Arc<PublishStats>,
}

impl DispatchQueue {
    pub fn new(stats: Arc<PublishStats>) -> (Self, mpsc::UnboundedReceiver<PublishTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Self {
            sender: Mutex::new(Some(sender)),
            stats,
        };
        (queue, receiver)
    }

    /// Enqueues a task. Fails with [`AppenderError::Rejected`] once the queue is closed.
    pub fn submit(&self, task: PublishTask) -> Result<(), AppenderError> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            self.stats.record_rejected();
            return Err(AppenderError::Rejected);
        };
        if sender.send(task).is_err() {
            self.stats.record_rejected();
            return Err(AppenderError::Rejected);
        }
        self.stats.record_submitted();
        Ok(())
    }

    /// Stops accepting work. Tasks already queued stay available to the worker.
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    pub fn is_open(&self) -> bool {
        self.sender.lock().is_some()
    }
}

/// The single consumer of a [`DispatchQueue`].
pub struct PublishWorker<C: Connector> {
    receiver: mpsc::UnboundedReceiver<PublishTask>,
    manager: Arc<ConnectionManager<C>>,
    route: Route,
    sink: Arc<dyn ErrorSink>,
    stats: Arc<PublishStats>,
}

/// Join handle plus the token that stops the worker between tasks.
pub struct WorkerHandle {
    pub join: JoinHandle<()>,
    pub cancel: CancellationToken,
}

impl<C: Connector> PublishWorker<C> {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<PublishTask>,
        manager: Arc<ConnectionManager<C>>,
        route: Route,
        sink: Arc<dyn ErrorSink>,
        stats: Arc<PublishStats>,
    ) -> Self {
        Self {
            receiver,
            manager,
            route,
            sink,
            stats,
        }
    }

    pub fn spawn(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(self.run(token));
        WorkerHandle { join, cancel }
    }

    /// Drains the queue one task at a time until it is closed and empty, or until
    /// cancelled. A task already started always runs to completion.
    async fn run(mut self, cancel: CancellationToken) {
        debug!(exchange = %self.route.exchange, "Publish worker started");
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("Publish worker cancelled");
                    break;
                }
                task = self.receiver.recv() => match task {
                    Some(task) => self.process(task).await,
                    None => {
                        debug!("Dispatch queue closed and drained");
                        break;
                    }
                },
            }
        }
        info!(stats = ?self.stats.snapshot(), "Publish worker stopped");
    }

    async fn process(&self, task: PublishTask) {
        match task.execute(&self.manager, &self.route).await {
            Ok(()) => {
                self.stats.record_published();
                debug!(sequence = task.sequence(), bytes = task.payload().len(), "Log event published");
            }
            Err(error) => {
                self.stats.record_failed();
                self.sink.report(&error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;
    use bytes::Bytes;
    use chrono::Utc;

    fn task(sequence: u64) -> PublishTask {
        PublishTask::new(
            Arc::from("test"),
            sequence,
            Utc::now(),
            Severity::Info,
            None,
            Bytes::from_static(b"{}"),
        )
    }

    #[tokio::test]
    async fn test_queue_preserves_submission_order() {
        let stats = Arc::new(PublishStats::new());
        let (queue, mut receiver) = DispatchQueue::new(stats.clone());
        for sequence in 0..3 {
            queue.submit(task(sequence)).unwrap();
        }
        queue.close();

        let mut seen = Vec::new();
        while let Some(task) = receiver.recv().await {
            seen.push(task.sequence());
        }
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(stats.snapshot().submitted, 3);
    }

    #[test]
    fn test_submit_after_close_is_rejected() {
        let stats = Arc::new(PublishStats::new());
        let (queue, _receiver) = DispatchQueue::new(stats.clone());
        assert!(queue.close());
        assert!(!queue.close());

        assert_eq!(queue.submit(task(0)), Err(AppenderError::Rejected));
        assert_eq!(stats.snapshot().rejected, 1);
        assert!(!queue.is_open());
    }
}
