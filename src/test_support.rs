//! Shared test support utilities
//!
//! An in-memory broker implementing the [`Connector`] seam, with recording and
//! fault injection, plus an [`ErrorSink`] that keeps everything it is given.
//! Used by unit tests, integration tests and benches.

use crate::broker::{
    BrokerChannel, BrokerConnection, BrokerError, ConnectionOptions, Connector, ExchangeSpec,
    MessageProperties, QueueSpec,
};
use crate::domain::AppenderError;
use crate::reliability::ErrorSink;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// A message as the broker received it.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Bytes,
}

impl PublishedMessage {
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Declaration calls in the order they reached the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Exchange(ExchangeSpec),
    Queue(QueueSpec),
    Binding {
        queue: String,
        exchange: String,
        routing_key: String,
    },
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueSpec>,
    bindings: Vec<(String, String, String)>,
    declarations: Vec<Declaration>,
    published: Vec<PublishedMessage>,
    failing_markers: Vec<String>,
    current_connection: Option<Arc<AtomicBool>>,
    current_channel: Option<Arc<AtomicBool>>,
    publish_delay: Option<Duration>,
}

/// In-memory broker shared by every connection a [`FakeConnector`] opens.
pub struct FakeBroker {
    state: Mutex<BrokerState>,
    connect_attempts: AtomicUsize,
    connections_opened: AtomicUsize,
    channels_opened: AtomicUsize,
    channel_closes: AtomicUsize,
    connection_closes: AtomicUsize,
    concurrent_entries: AtomicUsize,
    in_flight: AtomicUsize,
    fail_connect: AtomicBool,
    fail_channel_close: AtomicBool,
    fail_connection_close: AtomicBool,
    blocked: watch::Sender<bool>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            connect_attempts: AtomicUsize::new(0),
            connections_opened: AtomicUsize::new(0),
            channels_opened: AtomicUsize::new(0),
            channel_closes: AtomicUsize::new(0),
            connection_closes: AtomicUsize::new(0),
            concurrent_entries: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            fail_channel_close: AtomicBool::new(false),
            fail_connection_close: AtomicBool::new(false),
            blocked: watch::Sender::new(false),
        }
    }

    // Fault injection

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Publishes whose body contains `marker` fail with a protocol error.
    pub fn fail_publishes_containing(&self, marker: impl Into<String>) {
        self.state.lock().failing_markers.push(marker.into());
    }

    /// While blocked, publish calls wait without completing.
    pub fn set_publishes_blocked(&self, blocked: bool) {
        self.blocked.send_replace(blocked);
    }

    pub fn set_publish_delay(&self, delay: Duration) {
        self.state.lock().publish_delay = Some(delay);
    }

    pub fn set_fail_channel_close(&self, fail: bool) {
        self.fail_channel_close.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_connection_close(&self, fail: bool) {
        self.fail_connection_close.store(fail, Ordering::SeqCst);
    }

    /// Marks the most recent channel closed, as a broker-side channel error would.
    pub fn close_current_channel(&self) {
        if let Some(open) = &self.state.lock().current_channel {
            open.store(false, Ordering::SeqCst);
        }
    }

    /// Marks the most recent connection closed, as a network drop would.
    pub fn close_current_connection(&self) {
        if let Some(open) = &self.state.lock().current_connection {
            open.store(false, Ordering::SeqCst);
        }
    }

    /// Seeds an exchange that exists before any client connects.
    pub fn preset_exchange(&self, exchange: ExchangeSpec) {
        self.state
            .lock()
            .exchanges
            .insert(exchange.name.clone(), exchange);
    }

    pub fn preset_queue(&self, queue: QueueSpec) {
        self.state.lock().queues.insert(queue.name.clone(), queue);
    }

    // Recording

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    pub fn declarations(&self) -> Vec<Declaration> {
        self.state.lock().declarations.clone()
    }

    pub fn exchange(&self, name: &str) -> Option<ExchangeSpec> {
        self.state.lock().exchanges.get(name).cloned()
    }

    pub fn queue(&self, name: &str) -> Option<QueueSpec> {
        self.state.lock().queues.get(name).cloned()
    }

    /// Distinct `(queue, exchange, routing_key)` bindings.
    pub fn bindings(&self) -> Vec<(String, String, String)> {
        self.state.lock().bindings.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    pub fn channels_opened(&self) -> usize {
        self.channels_opened.load(Ordering::SeqCst)
    }

    pub fn channel_closes(&self) -> usize {
        self.channel_closes.load(Ordering::SeqCst)
    }

    pub fn connection_closes(&self) -> usize {
        self.connection_closes.load(Ordering::SeqCst)
    }

    /// Times a channel operation started while another was still running.
    pub fn concurrent_entries(&self) -> usize {
        self.concurrent_entries.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<InFlightGuard<'_>, BrokerError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.concurrent_entries.fetch_add(1, Ordering::SeqCst);
            return Err(BrokerError::Protocol(
                "concurrent use of a channel".to_string(),
            ));
        }
        Ok(InFlightGuard { broker: self })
    }
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlightGuard<'a> {
    broker: &'a FakeBroker,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.broker.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct FakeConnector {
    broker: Arc<FakeBroker>,
}

impl FakeConnector {
    pub fn new(broker: Arc<FakeBroker>) -> Self {
        Self { broker }
    }
}

impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self, options: &ConnectionOptions) -> Result<FakeConnection, BrokerError> {
        self.broker.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.broker.fail_connect.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionFailed(format!(
                "{} refused the connection",
                options.display_address()
            )));
        }

        let open = Arc::new(AtomicBool::new(true));
        self.broker.state.lock().current_connection = Some(open.clone());
        self.broker.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            broker: self.broker.clone(),
            open,
        })
    }
}

pub struct FakeConnection {
    broker: Arc<FakeBroker>,
    open: Arc<AtomicBool>,
}

impl BrokerConnection for FakeConnection {
    type Channel = FakeChannel;

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn create_channel(&self) -> Result<FakeChannel, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::ChannelClosed("connection is closed".to_string()));
        }
        let open = Arc::new(AtomicBool::new(true));
        self.broker.state.lock().current_channel = Some(open.clone());
        self.broker.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeChannel {
            broker: self.broker.clone(),
            open,
            connection_open: self.open.clone(),
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.broker.fail_connection_close.load(Ordering::SeqCst) {
            return Err(BrokerError::Protocol("connection close refused".to_string()));
        }
        self.open.store(false, Ordering::SeqCst);
        self.broker.connection_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeChannel {
    broker: Arc<FakeBroker>,
    open: Arc<AtomicBool>,
    connection_open: Arc<AtomicBool>,
}

impl FakeChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed("channel is closed".to_string()))
        }
    }
}

impl BrokerChannel for FakeChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst)
    }

    async fn exchange_declare(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let _guard = self.broker.enter()?;
        let mut state = self.broker.state.lock();
        state.declarations.push(Declaration::Exchange(exchange.clone()));
        match state.exchanges.get(&exchange.name) {
            Some(existing) if existing != exchange => Err(BrokerError::PreconditionFailed(format!(
                "inequivalent arguments for exchange '{}': declared {} durable={}, existing {} durable={}",
                exchange.name, exchange.kind, exchange.durable, existing.kind, existing.durable
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.name.clone(), exchange.clone());
                Ok(())
            }
        }
    }

    async fn queue_declare(&self, queue: &QueueSpec) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let _guard = self.broker.enter()?;
        let mut state = self.broker.state.lock();
        state.declarations.push(Declaration::Queue(queue.clone()));
        match state.queues.get(&queue.name) {
            Some(existing) if existing != queue => Err(BrokerError::PreconditionFailed(format!(
                "inequivalent arguments for queue '{}'",
                queue.name
            ))),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(queue.name.clone(), queue.clone());
                Ok(())
            }
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let _guard = self.broker.enter()?;
        let mut state = self.broker.state.lock();
        state.declarations.push(Declaration::Binding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        if !state.exchanges.contains_key(exchange) || !state.queues.contains_key(queue) {
            return Err(BrokerError::Protocol(format!(
                "cannot bind '{queue}' to '{exchange}': not declared"
            )));
        }
        let binding = (queue.to_string(), exchange.to_string(), routing_key.to_string());
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let _guard = self.broker.enter()?;

        let delay = self.broker.state.lock().publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut unblocked = self.broker.blocked.subscribe();
        let _ = unblocked.wait_for(|blocked| !*blocked).await;

        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let text = String::from_utf8_lossy(body);
        if state
            .failing_markers
            .iter()
            .any(|marker| text.contains(marker.as_str()))
        {
            return Err(BrokerError::Protocol(format!(
                "publish rejected for {}",
                properties.correlation_id
            )));
        }
        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties: properties.clone(),
            body: Bytes::copy_from_slice(body),
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.broker.fail_channel_close.load(Ordering::SeqCst) {
            return Err(BrokerError::Protocol("channel close refused".to_string()));
        }
        self.open.store(false, Ordering::SeqCst);
        self.broker.channel_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Error sink that keeps every report for later assertions.
#[derive(Default)]
pub struct RecordingErrorSink {
    errors: Mutex<Vec<AppenderError>>,
}

impl RecordingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<AppenderError> {
        self.errors.lock().clone()
    }

    pub fn publish_failures(&self) -> Vec<AppenderError> {
        self.errors
            .lock()
            .iter()
            .filter(|e| e.is_publish_failure())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report(&self, error: &AppenderError) {
        self.errors.lock().push(error.clone());
    }
}
