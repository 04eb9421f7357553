use crate::broker::{ConnectionManager, Connector};
use crate::domain::{AppenderError, Resource};
use crate::reliability::ErrorSink;
use crate::sender::{DispatchQueue, PublishStats, WorkerHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long a cancelled worker gets to finish its current publish before it is aborted.
const FORCE_STOP_GRACE: Duration = Duration::from_millis(100);

/// Outcome of one [`ShutdownCoordinator::close`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The worker emptied the queue before the deadline.
    pub drained: bool,
    pub abandoned: u64,
    /// Channel/connection close failures reported to the sink.
    pub release_failures: usize,
    pub elapsed: Duration,
}

/// Stops the publishing pipeline in order: queue, worker, channel, connection.
pub struct ShutdownCoordinator<C: Connector> {
    queue: Arc<DispatchQueue>,
    worker: Mutex<Option<WorkerHandle>>,
    manager: Arc<ConnectionManager<C>>,
    sink: Arc<dyn ErrorSink>,
    stats: Arc<PublishStats>,
    timeout: Duration,
}

impl<C: Connector> ShutdownCoordinator<C> {
    pub fn new(
        queue: Arc<DispatchQueue>,
        worker: WorkerHandle,
        manager: Arc<ConnectionManager<C>>,
        sink: Arc<dyn ErrorSink>,
        stats: Arc<PublishStats>,
        timeout: Duration,
    ) -> Self {
        Self {
            queue,
            worker: Mutex::new(Some(worker)),
            manager,
            sink,
            stats,
            timeout,
        }
    }

    /// Returns `None` when shutdown already ran (or is running) on another call.
    pub async fn close(&self) -> Option<ShutdownReport> {
        if !self.queue.close() {
            return None;
        }
        let start = Instant::now();
        info!(
            pending = self.stats.pending(),
            timeout = ?self.timeout,
            "Closing log publisher"
        );

        let worker = self.worker.lock().take();
        let drained = match worker {
            Some(handle) => self.stop_worker(handle).await,
            None => true,
        };

        let mut abandoned = 0;
        if !drained {
            abandoned = self.stats.pending();
            self.stats.record_abandoned(abandoned);
            self.sink.report(&AppenderError::ShutdownFailure {
                resource: Resource::Worker,
                reason: format!(
                    "still busy after {:?}, {abandoned} queued events abandoned",
                    self.timeout
                ),
            });
        }

        let failures = self.manager.close(self.timeout).await;
        for failure in &failures {
            self.sink.report(failure);
        }

        let report = ShutdownReport {
            drained,
            abandoned,
            release_failures: failures.len(),
            elapsed: start.elapsed(),
        };
        info!(?report, "Log publisher closed");
        Some(report)
    }

    /// Waits for the worker to drain the closed queue. Past the deadline it is
    /// cancelled, given a short grace for the in-flight publish, then aborted.
    async fn stop_worker(&self, mut handle: WorkerHandle) -> bool {
        match tokio::time::timeout(self.timeout, &mut handle.join).await {
            Ok(Ok(())) => true,
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "Publish worker terminated abnormally");
                false
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Publish worker did not finish in time, cancelling");
                handle.cancel.cancel();
                if tokio::time::timeout(FORCE_STOP_GRACE, &mut handle.join)
                    .await
                    .is_err()
                {
                    handle.join.abort();
                    let _ = tokio::time::timeout(FORCE_STOP_GRACE, handle.join).await;
                }
                false
            }
        }
    }
}
