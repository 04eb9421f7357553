//! The appender handle and its ambient plumbing: configuration, shutdown,
//! logging setup and the `tracing` bridge.

pub mod config;
pub mod layer;
pub mod logging_system;
pub mod shutdown;

pub use config::{AppenderConfig, ConfigError};
pub use layer::AmqpLayer;
pub use logging_system::{LoggingError, LoggingSystem};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};

use crate::broker::{ConnectionManager, ConnectionOptions, Connector, LapinConnector, Topology};
use crate::domain::{AppenderError, LogEvent};
use crate::layout::Layout;
use crate::reliability::ErrorSink;
use crate::sender::{
    DispatchQueue, PublishStats, PublishTask, PublishWorker, StatsSnapshot, compose_correlation_id,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handle to an activated publisher. Cheap to clone; all clones share one
/// connection, one queue and one worker.
pub struct Appender<C: Connector = LapinConnector> {
    inner: Option<Arc<AppenderInner<C>>>,
}

struct AppenderInner<C: Connector> {
    identifier: Arc<str>,
    expiration: Option<Duration>,
    layout: Arc<dyn Layout>,
    queue: Arc<DispatchQueue>,
    sequence: AtomicU64,
    active: AtomicBool,
    stats: Arc<PublishStats>,
    sink: Arc<dyn ErrorSink>,
    manager: Arc<ConnectionManager<C>>,
    shutdown: ShutdownCoordinator<C>,
}

impl<C: Connector> Clone for Appender<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> Appender<C> {
    /// Validates the configuration, asserts the broker topology and starts the worker.
    ///
    /// Broker failures during activation go to `sink` and leave the appender running
    /// in a degraded state; only an invalid configuration is returned as an error.
    pub async fn activate(
        config: AppenderConfig,
        connector: C,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self, ConfigError> {
        let layout = config.layout.build();
        Self::activate_with_layout(config, connector, layout, sink).await
    }

    pub async fn activate_with_layout(
        config: AppenderConfig,
        connector: C,
        layout: Arc<dyn Layout>,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if !config.enabled {
            info!("Log publisher disabled by configuration");
            return Ok(Self::disabled());
        }

        let identifier = config.resolved_identifier();
        let topology = Topology::from_config(&config);
        let manager = Arc::new(ConnectionManager::new(
            connector,
            ConnectionOptions::from_config(&config, &identifier),
        ));

        if let Err(error) = manager.declare_topology(&topology).await {
            warn!(%error, "Topology not asserted, publisher activated in degraded state");
            sink.report(&error);
        }

        let stats = Arc::new(PublishStats::new());
        let (queue, receiver) = DispatchQueue::new(stats.clone());
        let queue = Arc::new(queue);
        let worker = PublishWorker::new(
            receiver,
            manager.clone(),
            topology.route(),
            sink.clone(),
            stats.clone(),
        )
        .spawn();
        let shutdown = ShutdownCoordinator::new(
            queue.clone(),
            worker,
            manager.clone(),
            sink.clone(),
            stats.clone(),
            config.shutdown_timeout(),
        );

        info!(
            identifier = %identifier,
            exchange = %topology.exchange.name,
            queue = %topology.queue.name,
            routing_key = %topology.routing_key,
            active = config.activated,
            "Log publisher activated"
        );

        Ok(Self {
            inner: Some(Arc::new(AppenderInner {
                identifier: Arc::from(identifier),
                expiration: config.message_expiration(),
                layout,
                queue,
                sequence: AtomicU64::new(0),
                active: AtomicBool::new(config.activated),
                stats,
                sink,
                manager,
                shutdown,
            })),
        })
    }

    /// A handle that drops every event.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.active.load(Ordering::Acquire))
    }

    /// Pauses or resumes publishing. Events appended while paused are dropped.
    pub fn set_active(&self, active: bool) {
        if let Some(inner) = &self.inner {
            inner.active.store(active, Ordering::Release);
            debug!(active, "Log publisher toggled");
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        self.inner.as_deref().map(|inner| &*inner.identifier)
    }

    /// Formats the event in the calling thread and queues it. Never blocks on the
    /// network and never fails; problems go to the error sink.
    pub fn append(&self, event: &LogEvent) {
        let Some(inner) = &self.inner else {
            return;
        };
        if !inner.active.load(Ordering::Acquire) {
            return;
        }

        let sequence = inner.sequence.fetch_add(1, Ordering::Relaxed);
        let payload = match inner.layout.format(event) {
            Ok(payload) => payload,
            Err(error) => {
                inner.stats.record_format_failure();
                inner.sink.report(&AppenderError::PublishFailure {
                    correlation_id: compose_correlation_id(
                        &inner.identifier,
                        &event.timestamp,
                        sequence,
                    ),
                    reason: error.to_string(),
                });
                return;
            }
        };

        self.submit(PublishTask::new(
            inner.identifier.clone(),
            sequence,
            event.timestamp,
            event.severity,
            inner.expiration,
            payload,
        ));
    }

    /// Queues a prepared task. After [`close`](Self::close) the task is counted as
    /// rejected and dropped.
    pub fn submit(&self, task: PublishTask) {
        let Some(inner) = &self.inner else {
            return;
        };
        if inner.queue.submit(task).is_err() {
            debug!("Log publisher closed, event rejected");
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner
            .as_ref()
            .map(|inner| inner.stats.snapshot())
            .unwrap_or_default()
    }

    pub async fn is_connected(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.manager.is_connected().await,
            None => false,
        }
    }

    /// Drains and stops the worker, then releases the channel and connection.
    /// Bounded by the configured shutdown timeout. Only the first call does work.
    pub async fn close(&self) -> Option<ShutdownReport> {
        match &self.inner {
            Some(inner) => inner.shutdown.close().await,
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutError, SimpleJsonLayout};
    use crate::test_support::{FakeBroker, FakeConnector, RecordingErrorSink};
    use bytes::Bytes;
    use tracing_test::traced_test;

    struct BrokenLayout;

    impl Layout for BrokenLayout {
        fn format(&self, _event: &LogEvent) -> Result<Bytes, LayoutError> {
            Err(LayoutError::Serialization(
                serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
            ))
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_activation_logs_degraded_state() {
        let broker = Arc::new(FakeBroker::new());
        broker.set_fail_connect(true);
        let sink = Arc::new(RecordingErrorSink::new());

        let appender = Appender::activate(
            AppenderConfig::default(),
            FakeConnector::new(broker),
            sink.clone(),
        )
        .await
        .unwrap();

        assert!(appender.is_enabled());
        assert!(logs_contain("publisher activated in degraded state"));
        assert!(matches!(
            sink.errors().as_slice(),
            [AppenderError::Connectivity(_)]
        ));
        appender.close().await;
    }

    #[tokio::test]
    async fn test_layout_failure_reported_as_publish_failure() {
        let broker = Arc::new(FakeBroker::new());
        let sink = Arc::new(RecordingErrorSink::new());
        let config = AppenderConfig {
            identifier: Some("billing".to_string()),
            ..AppenderConfig::default()
        };
        let appender = Appender::activate_with_layout(
            config,
            FakeConnector::new(broker.clone()),
            Arc::new(BrokenLayout),
            sink.clone(),
        )
        .await
        .unwrap();

        appender.append(&LogEvent::new(crate::Severity::Info, "billing", "lost"));
        appender.close().await;

        assert!(broker.published().is_empty());
        let failures = sink.publish_failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0],
            AppenderError::PublishFailure { correlation_id, .. } if correlation_id.starts_with("billing:")
        ));
        let stats = appender.stats();
        assert_eq!((stats.submitted, stats.failed), (1, 1));
    }

    #[tokio::test]
    async fn test_invalid_config_is_returned() {
        let config = AppenderConfig {
            port: 0,
            ..AppenderConfig::default()
        };
        let result = Appender::activate_with_layout(
            config,
            FakeConnector::new(Arc::new(FakeBroker::new())),
            Arc::new(SimpleJsonLayout::new()),
            Arc::new(RecordingErrorSink::new()),
        )
        .await;
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_disabled_handle_is_inert() {
        let appender: Appender = Appender::disabled();
        appender.set_active(true);
        appender.append(&LogEvent::new(crate::Severity::Info, "app", "ignored"));

        assert!(!appender.is_active());
        assert_eq!(appender.identifier(), None);
        assert_eq!(appender.stats(), StatsSnapshot::default());
    }
}
