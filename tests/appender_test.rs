mod common;

use common::{activate, event, published_messages, test_config};
use rask_log_publisher::sender::JSON_CONTENT_TYPE;
use rask_log_publisher::{AppenderError, Severity};
use std::collections::HashMap;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_events_published_in_submission_order() {
    let harness = activate(test_config()).await;

    for message in ["A", "B", "C"] {
        harness.appender.append(&event(message));
    }
    let report = harness.appender.close().await.unwrap();

    assert!(report.drained);
    let published = harness.broker.published();
    assert_eq!(published.len(), 3);
    assert_eq!(published_messages(&harness.broker), vec!["A", "B", "C"]);
    for message in &published {
        assert_eq!(message.exchange, "log-exchange");
        assert_eq!(message.routing_key, "orders");
        assert_eq!(message.properties.content_type, JSON_CONTENT_TYPE);
        assert_eq!(message.properties.app_id, "orders-api");
        assert_eq!(message.properties.kind, "INFO");
    }
    assert!(harness.sink.is_empty());
}

#[tokio::test]
async fn test_failed_publish_reported_once_and_worker_continues() {
    let harness = activate(test_config()).await;
    harness.broker.fail_publishes_containing(r#""message":"B""#);

    for message in ["A", "B", "C"] {
        harness.appender.append(&event(message));
    }
    harness.appender.close().await.unwrap();

    assert_eq!(published_messages(&harness.broker), vec!["A", "C"]);
    let failures = harness.sink.publish_failures();
    assert_eq!(failures.len(), 1);
    let AppenderError::PublishFailure { correlation_id, .. } = &failures[0] else {
        panic!("expected a publish failure, got {failures:?}");
    };
    assert!(correlation_id.starts_with("orders-api:"));
    assert!(correlation_id.ends_with(":1"));

    let stats = harness.appender.stats();
    assert_eq!(stats.published, 2);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_concurrent_callers_never_share_the_channel() {
    let harness = activate(test_config()).await;
    harness
        .broker
        .set_publish_delay(std::time::Duration::from_micros(200));

    let mut callers = JoinSet::new();
    for caller in 0..8 {
        let appender = harness.appender.clone();
        callers.spawn(async move {
            for i in 0..25 {
                appender.append(&event(&format!("{caller}-{i}")));
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(joined) = callers.join_next().await {
        joined.unwrap();
    }
    harness.appender.close().await.unwrap();

    assert_eq!(harness.broker.concurrent_entries(), 0);
    let messages = published_messages(&harness.broker);
    assert_eq!(messages.len(), 200);

    // Each caller's own events keep their relative order.
    let mut last_seen: HashMap<String, i64> = HashMap::new();
    for message in messages {
        let (caller, index) = message.split_once('-').unwrap();
        let index: i64 = index.parse().unwrap();
        let previous = last_seen.insert(caller.to_string(), index).unwrap_or(-1);
        assert!(index > previous, "caller {caller} out of order");
    }
}

#[tokio::test]
async fn test_correlation_ids_are_unique() {
    let harness = activate(test_config()).await;
    for _ in 0..20 {
        harness.appender.append(&event("same"));
    }
    harness.appender.close().await.unwrap();

    let mut ids: Vec<String> = harness
        .broker
        .published()
        .into_iter()
        .map(|m| m.properties.correlation_id)
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
}

#[tokio::test]
async fn test_expiration_and_severity_properties() {
    let config = rask_log_publisher::AppenderConfig {
        message_expiration_ms: 30_000,
        ..test_config()
    };
    let harness = activate(config).await;

    harness.appender.append(&rask_log_publisher::LogEvent::new(
        Severity::Error,
        "orders::payment",
        "card declined",
    ));
    harness.appender.close().await.unwrap();

    let published = harness.broker.published();
    assert_eq!(published[0].properties.expiration.as_deref(), Some("30000"));
    assert_eq!(published[0].properties.kind, "ERROR");
}

#[tokio::test]
async fn test_paused_appender_drops_events() {
    let harness = activate(test_config()).await;

    harness.appender.set_active(false);
    harness.appender.append(&event("dropped"));
    harness.appender.set_active(true);
    harness.appender.append(&event("kept"));
    harness.appender.close().await.unwrap();

    assert_eq!(published_messages(&harness.broker), vec!["kept"]);
    assert_eq!(harness.appender.stats().submitted, 1);
}

#[tokio::test]
async fn test_inactive_on_start_when_configured() {
    let config = rask_log_publisher::AppenderConfig {
        activated: false,
        ..test_config()
    };
    let harness = activate(config).await;

    assert!(harness.appender.is_enabled());
    assert!(!harness.appender.is_active());
    harness.appender.append(&event("ignored"));
    harness.appender.close().await.unwrap();

    assert!(harness.broker.published().is_empty());
}

#[tokio::test]
async fn test_disabled_appender_never_connects() {
    let config = rask_log_publisher::AppenderConfig {
        enabled: false,
        ..test_config()
    };
    let harness = activate(config).await;

    harness.appender.append(&event("ignored"));
    assert!(harness.appender.close().await.is_none());

    assert!(!harness.appender.is_enabled());
    assert_eq!(harness.broker.connect_attempts(), 0);
}

#[tokio::test]
async fn test_events_after_close_are_rejected_without_reconnecting() {
    let harness = activate(test_config()).await;
    harness.appender.append(&event("before"));
    harness.appender.close().await.unwrap();

    harness.appender.append(&event("after"));

    assert_eq!(published_messages(&harness.broker), vec!["before"]);
    assert_eq!(harness.appender.stats().rejected, 1);
    assert_eq!(harness.broker.connections_opened(), 1);
    assert!(!harness.appender.is_connected().await);
    assert!(harness.sink.is_empty());
}

#[tokio::test]
async fn test_clones_share_one_pipeline() {
    let harness = activate(test_config()).await;
    let other = harness.appender.clone();

    other.append(&event("from clone"));
    harness.appender.append(&event("from first handle"));
    assert!(other.close().await.is_some());
    assert!(harness.appender.close().await.is_none());

    assert_eq!(harness.broker.published().len(), 2);
    assert_eq!(harness.broker.connections_opened(), 1);
}
