//! Broker access: the transport seam, connection/channel lifecycle and topology.
//!
//! Everything above this module talks to the broker through [`ConnectionManager`];
//! the traits below are the only place that knows about a concrete AMQP client.

pub mod lapin_client;
pub mod manager;
pub mod options;
pub mod topology;

pub use lapin_client::LapinConnector;
pub use manager::ConnectionManager;
pub use options::ConnectionOptions;
pub use topology::{ExchangeSpec, ExchangeType, QueueArguments, QueueSpec, Route, Topology};

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Metadata sent with every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub app_id: String,
    pub correlation_id: String,
    /// AMQP `type` property.
    pub kind: String,
    pub content_type: String,
    /// Per-message TTL in milliseconds, as the decimal string AMQP expects.
    pub expiration: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<u64>,
}

/// Opens network sessions to the broker.
pub trait Connector: Send + Sync + 'static {
    type Connection: BrokerConnection;

    fn connect(
        &self,
        options: &ConnectionOptions,
    ) -> impl Future<Output = Result<Self::Connection, BrokerError>> + Send;
}

pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    fn is_open(&self) -> bool;

    fn create_channel(&self) -> impl Future<Output = Result<Self::Channel, BrokerError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// A channel multiplexed over a connection. Not safe for concurrent use; the
/// [`ConnectionManager`] lock serializes every call.
pub trait BrokerChannel: Clone + Send + Sync + 'static {
    fn is_open(&self) -> bool;

    fn exchange_declare(
        &self,
        exchange: &ExchangeSpec,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    fn queue_declare(&self, queue: &QueueSpec) -> impl Future<Output = Result<(), BrokerError>> + Send;

    fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// Channel type produced by a connector's connections.
pub type ChannelOf<C> = <<C as Connector>::Connection as BrokerConnection>::Channel;
