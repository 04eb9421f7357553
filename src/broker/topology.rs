use super::{BrokerChannel, BrokerError};
use crate::app::AppenderConfig;
use crate::domain::AppenderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
            ExchangeType::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(ExchangeType::Direct),
            "fanout" => Ok(ExchangeType::Fanout),
            "topic" => Ok(ExchangeType::Topic),
            "headers" => Ok(ExchangeType::Headers),
            _ => Err(format!(
                "unknown exchange type '{s}'. Valid values: direct, fanout, topic, headers"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeType,
    pub durable: bool,
}

/// Optional queue policy arguments. Only positive configured values are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueArguments {
    pub max_length: Option<u64>,
    pub max_length_bytes: Option<u64>,
    /// Milliseconds.
    pub message_ttl: Option<u64>,
}

impl QueueArguments {
    pub fn from_limits(max_length: u64, max_length_bytes: u64, message_ttl_ms: u64) -> Self {
        Self {
            max_length: (max_length > 0).then_some(max_length),
            max_length_bytes: (max_length_bytes > 0).then_some(max_length_bytes),
            message_ttl: (message_ttl_ms > 0).then_some(message_ttl_ms),
        }
    }

    /// Broker argument names and values, in declaration order.
    pub fn entries(&self) -> Vec<(&'static str, u64)> {
        [
            ("x-max-length", self.max_length),
            ("x-max-length-bytes", self.max_length_bytes),
            ("x-message-ttl", self.message_ttl),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: QueueArguments,
}

/// Where published messages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub exchange: String,
    pub routing_key: String,
}

/// Exchange, queue and the binding between them. Immutable after activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: ExchangeSpec,
    pub queue: QueueSpec,
    pub routing_key: String,
}

impl Topology {
    pub fn from_config(config: &AppenderConfig) -> Self {
        Self {
            exchange: ExchangeSpec {
                name: config.exchange_name.clone(),
                kind: config.exchange_type,
                durable: config.exchange_durable,
            },
            queue: QueueSpec {
                name: config.queue_name.clone(),
                durable: config.queue_durable,
                exclusive: config.queue_exclusive,
                auto_delete: config.queue_auto_delete,
                arguments: QueueArguments::from_limits(
                    config.queue_max_length,
                    config.queue_max_length_bytes,
                    config.queue_message_ttl_ms,
                ),
            },
            routing_key: config.routing_key.clone(),
        }
    }

    pub fn route(&self) -> Route {
        Route {
            exchange: self.exchange.name.clone(),
            routing_key: self.routing_key.clone(),
        }
    }
}

/// Declares the exchange, then the queue, then binds them.
///
/// Callers must hold the connection manager lock for the whole sequence.
pub(crate) async fn assert_topology<Ch: BrokerChannel>(
    channel: &Ch,
    topology: &Topology,
) -> Result<(), AppenderError> {
    let exchange = &topology.exchange;
    let queue = &topology.queue;

    channel
        .exchange_declare(exchange)
        .await
        .map_err(|e| declaration_error("exchange", &exchange.name, e))?;
    debug!(exchange = %exchange.name, kind = %exchange.kind, durable = exchange.durable, "Exchange declared");

    channel
        .queue_declare(queue)
        .await
        .map_err(|e| declaration_error("queue", &queue.name, e))?;
    debug!(queue = %queue.name, arguments = ?queue.arguments.entries(), "Queue declared");

    channel
        .queue_bind(&queue.name, &exchange.name, &topology.routing_key)
        .await
        .map_err(|e| declaration_error("binding for queue", &queue.name, e))?;

    info!(
        exchange = %exchange.name,
        queue = %queue.name,
        routing_key = %topology.routing_key,
        "Broker topology asserted"
    );
    Ok(())
}

fn declaration_error(what: &str, name: &str, error: BrokerError) -> AppenderError {
    match error {
        BrokerError::PreconditionFailed(reason) => {
            AppenderError::TopologyConflict(format!("{what} '{name}': {reason}"))
        }
        other => AppenderError::Connectivity(format!("declaring {what} '{name}': {other}")),
    }
}
