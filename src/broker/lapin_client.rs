//! [`Connector`] implementation backed by `lapin`.

use super::{
    BrokerChannel, BrokerConnection, BrokerError, ConnectionOptions, Connector, ExchangeSpec,
    ExchangeType, MessageProperties, QueueArguments, QueueSpec,
};
use lapin::options::{
    BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::debug;

const REPLY_SUCCESS: u16 = 200;
const CLOSE_REASON: &str = "log publisher shutting down";

#[derive(Debug, Clone, Copy, Default)]
pub struct LapinConnector;

impl LapinConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for LapinConnector {
    type Connection = LapinConnection;

    async fn connect(&self, options: &ConnectionOptions) -> Result<LapinConnection, BrokerError> {
        let uri = options.amqp_uri()?;
        let properties = ConnectionProperties::default()
            .with_connection_name(options.connection_name.clone().into());

        debug!(broker = %options.display_address(), "Connecting to broker");
        let limit = options.handshake_timeout;
        let connection = tokio::time::timeout(limit, Connection::connect(uri.as_str(), properties))
            .await
            .map_err(|_| BrokerError::HandshakeTimeout(limit))?
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        Ok(LapinConnection { inner: connection })
    }
}

pub struct LapinConnection {
    inner: Connection,
}

impl BrokerConnection for LapinConnection {
    type Channel = LapinChannel;

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn create_channel(&self) -> Result<LapinChannel, BrokerError> {
        self.inner
            .create_channel()
            .await
            .map(|inner| LapinChannel { inner })
            .map_err(map_lapin_error)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner
            .close(REPLY_SUCCESS, CLOSE_REASON)
            .await
            .map_err(map_lapin_error)
    }
}

#[derive(Clone)]
pub struct LapinChannel {
    inner: Channel,
}

impl BrokerChannel for LapinChannel {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn exchange_declare(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        let options = ExchangeDeclareOptions {
            durable: exchange.durable,
            ..ExchangeDeclareOptions::default()
        };
        self.inner
            .exchange_declare(
                &exchange.name,
                exchange_kind(exchange.kind),
                options,
                FieldTable::default(),
            )
            .await
            .map_err(map_lapin_error)
    }

    async fn queue_declare(&self, queue: &QueueSpec) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable: queue.durable,
            exclusive: queue.exclusive,
            auto_delete: queue.auto_delete,
            ..QueueDeclareOptions::default()
        };
        self.inner
            .queue_declare(&queue.name, options, field_table(&queue.arguments))
            .await
            .map(|_| ())
            .map_err(map_lapin_error)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(map_lapin_error)
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        self.inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                basic_properties(properties),
            )
            .await
            .map(|_confirm| ())
            .map_err(map_lapin_error)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner
            .close(REPLY_SUCCESS, CLOSE_REASON)
            .await
            .map_err(map_lapin_error)
    }
}

fn exchange_kind(kind: ExchangeType) -> ExchangeKind {
    match kind {
        ExchangeType::Direct => ExchangeKind::Direct,
        ExchangeType::Fanout => ExchangeKind::Fanout,
        ExchangeType::Topic => ExchangeKind::Topic,
        ExchangeType::Headers => ExchangeKind::Headers,
    }
}

fn field_table(arguments: &QueueArguments) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments.entries() {
        table.insert(
            ShortString::from(key),
            AMQPValue::LongLongInt(i64::try_from(value).unwrap_or(i64::MAX)),
        );
    }
    table
}

fn basic_properties(properties: &MessageProperties) -> BasicProperties {
    let mut basic = BasicProperties::default()
        .with_app_id(properties.app_id.clone().into())
        .with_correlation_id(properties.correlation_id.clone().into())
        .with_type(properties.kind.clone().into())
        .with_content_type(properties.content_type.clone().into());
    if let Some(expiration) = &properties.expiration {
        basic = basic.with_expiration(expiration.clone().into());
    }
    if let Some(timestamp) = properties.timestamp {
        basic = basic.with_timestamp(timestamp);
    }
    basic
}

fn map_lapin_error(error: lapin::Error) -> BrokerError {
    match &error {
        lapin::Error::ProtocolError(amqp)
            if matches!(
                amqp.kind(),
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
            ) =>
        {
            BrokerError::PreconditionFailed(amqp.to_string())
        }
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            BrokerError::ChannelClosed(error.to_string())
        }
        _ => BrokerError::Protocol(error.to_string()),
    }
}
