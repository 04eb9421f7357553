mod common;

use common::{activate, activate_on, event, published_messages, test_config, wait_until};
use rask_log_publisher::broker::{BrokerError, ConnectionOptions};
use rask_log_publisher::test_support::{Declaration, FakeBroker, RecordingErrorSink};
use rask_log_publisher::{Appender, AppenderConfig, AppenderError, Connector, LapinConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Accepts TCP connections and never answers the AMQP protocol header.
async fn silent_broker() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    port
}

fn silent_broker_config(port: u16, handshake_timeout_ms: u64) -> AppenderConfig {
    AppenderConfig {
        host: "127.0.0.1".to_string(),
        port,
        handshake_timeout_ms,
        ..test_config()
    }
}

fn exchange_declarations(broker: &FakeBroker) -> usize {
    broker
        .declarations()
        .iter()
        .filter(|d| matches!(d, Declaration::Exchange(_)))
        .count()
}

#[tokio::test]
async fn test_lost_connection_is_recreated_once_on_next_publish() {
    let harness = activate(test_config()).await;
    harness.appender.append(&event("A"));
    assert!(wait_until(|| harness.broker.published().len() == 1, Duration::from_secs(2)).await);

    harness.broker.close_current_connection();
    harness.appender.append(&event("B"));
    harness.appender.append(&event("C"));
    harness.appender.close().await.unwrap();

    assert_eq!(published_messages(&harness.broker), vec!["A", "B", "C"]);
    assert_eq!(harness.broker.connections_opened(), 2);
    assert_eq!(harness.broker.channels_opened(), 2);
    // Topology recovery re-asserts the declarations on the new connection.
    assert_eq!(exchange_declarations(&harness.broker), 2);
}

#[tokio::test]
async fn test_closed_channel_is_replaced_on_the_same_connection() {
    let harness = activate(test_config()).await;
    harness.appender.append(&event("A"));
    assert!(wait_until(|| harness.broker.published().len() == 1, Duration::from_secs(2)).await);

    harness.broker.close_current_channel();
    harness.appender.append(&event("B"));
    harness.appender.close().await.unwrap();

    assert_eq!(published_messages(&harness.broker), vec!["A", "B"]);
    assert_eq!(harness.broker.connections_opened(), 1);
    assert_eq!(harness.broker.channels_opened(), 2);
    assert_eq!(exchange_declarations(&harness.broker), 1);
}

#[tokio::test]
async fn test_topology_recovery_can_be_disabled() {
    let config = rask_log_publisher::AppenderConfig {
        topology_recovery_enabled: false,
        ..test_config()
    };
    let harness = activate(config).await;
    harness.appender.append(&event("A"));
    assert!(wait_until(|| harness.broker.published().len() == 1, Duration::from_secs(2)).await);

    harness.broker.close_current_connection();
    harness.appender.append(&event("B"));
    harness.appender.close().await.unwrap();

    assert_eq!(harness.broker.connections_opened(), 2);
    assert_eq!(exchange_declarations(&harness.broker), 1);
}

#[tokio::test]
async fn test_connect_to_unresponsive_broker_times_out() {
    let port = silent_broker().await;
    let options = ConnectionOptions::from_config(&silent_broker_config(port, 200), "orders-api");

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        LapinConnector::new().connect(&options),
    )
    .await
    .expect("connect must give up on its own");

    assert!(matches!(
        result,
        Err(BrokerError::HandshakeTimeout(limit)) if limit == Duration::from_millis(200)
    ));
}

#[tokio::test]
async fn test_activation_against_unresponsive_broker_reports_connectivity() {
    let port = silent_broker().await;
    let sink = Arc::new(RecordingErrorSink::new());

    let appender = tokio::time::timeout(
        Duration::from_secs(5),
        Appender::activate(
            silent_broker_config(port, 300),
            LapinConnector::new(),
            sink.clone(),
        ),
    )
    .await
    .expect("activation must not hang on a silent broker")
    .unwrap();

    match sink.errors().as_slice() {
        [AppenderError::Connectivity(message)] => {
            assert!(message.contains("Handshake timed out"), "{message}");
        }
        other => panic!("unexpected errors: {other:?}"),
    }

    tokio::time::timeout(Duration::from_secs(5), appender.close())
        .await
        .expect("close must not hang")
        .unwrap();
}

#[tokio::test]
async fn test_activation_degrades_when_broker_is_down() {
    let broker = Arc::new(FakeBroker::new());
    broker.set_fail_connect(true);
    let config = AppenderConfig {
        network_recovery_interval_ms: 300,
        ..test_config()
    };
    let harness = activate_on(broker, config).await;

    assert!(matches!(
        harness.sink.errors().as_slice(),
        [AppenderError::Connectivity(_)]
    ));

    // Inside the recovery interval the event is dropped without a new attempt.
    harness.appender.append(&event("lost"));
    assert!(wait_until(|| harness.appender.stats().failed == 1, Duration::from_secs(2)).await);
    assert_eq!(harness.broker.connect_attempts(), 1);

    harness.broker.set_fail_connect(false);
    tokio::time::sleep(Duration::from_millis(350)).await;
    harness.appender.append(&event("delivered"));
    harness.appender.close().await.unwrap();

    assert_eq!(published_messages(&harness.broker), vec!["delivered"]);
    assert!(harness.broker.exchange("log-exchange").is_some());
    assert_eq!(harness.broker.bindings().len(), 1);
    assert_eq!(harness.sink.publish_failures().len(), 1);
}
