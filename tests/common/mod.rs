#![allow(dead_code)]

use rask_log_publisher::app::AppenderConfig;
use rask_log_publisher::layout::LayoutKind;
use rask_log_publisher::test_support::{FakeBroker, FakeConnector, RecordingErrorSink};
use rask_log_publisher::{Appender, LogEvent, Severity};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Harness {
    pub broker: Arc<FakeBroker>,
    pub sink: Arc<RecordingErrorSink>,
    pub appender: Appender<FakeConnector>,
}

/// Simple layout, fixed identifier, short shutdown timeout.
pub fn test_config() -> AppenderConfig {
    let mut config = AppenderConfig {
        identifier: Some("orders-api".to_string()),
        routing_key: "orders".to_string(),
        shutdown_timeout_ms: 2_000,
        ..AppenderConfig::default()
    };
    config.layout.kind = LayoutKind::Simple;
    config
}

pub async fn activate(config: AppenderConfig) -> Harness {
    activate_on(Arc::new(FakeBroker::new()), config).await
}

pub async fn activate_on(broker: Arc<FakeBroker>, config: AppenderConfig) -> Harness {
    let sink = Arc::new(RecordingErrorSink::new());
    let appender = Appender::activate(config, FakeConnector::new(broker.clone()), sink.clone())
        .await
        .expect("test config is valid");
    Harness {
        broker,
        sink,
        appender,
    }
}

pub fn event(message: &str) -> LogEvent {
    LogEvent::new(Severity::Info, "orders::checkout", message)
}

pub fn published_messages(broker: &FakeBroker) -> Vec<String> {
    broker
        .published()
        .iter()
        .map(|m| m.body_json()["message"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Polls `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
