use super::topology::{Route, Topology, assert_topology};
use super::{
    BrokerChannel, BrokerConnection, BrokerError, ChannelOf, ConnectionOptions, Connector,
    MessageProperties,
};
use crate::domain::{AppenderError, Resource};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct ConnectionState<C: Connector> {
    connection: Option<C::Connection>,
    channel: Option<ChannelOf<C>>,
    /// Remembered for topology recovery after a reconnect.
    topology: Option<Topology>,
    /// Declaration failed for lack of a connection and must run on the next channel.
    topology_pending: bool,
    connected_before: bool,
    last_connect_failure: Option<Instant>,
    closed: bool,
}

impl<C: Connector> ConnectionState<C> {
    fn new() -> Self {
        Self {
            connection: None,
            channel: None,
            topology: None,
            topology_pending: false,
            connected_before: false,
            last_connect_failure: None,
            closed: false,
        }
    }
}

/// Owns the single connection and the single channel over it.
///
/// Every operation (acquire, declare, publish, close) runs under one lock, so at
/// most one caller touches the channel at any time.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    options: ConnectionOptions,
    state: Mutex<ConnectionState<C>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, options: ConnectionOptions) -> Self {
        Self {
            connector,
            options,
            state: Mutex::new(ConnectionState::new()),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Returns an open channel, creating the connection and/or channel when absent or closed.
    pub async fn acquire_channel(&self) -> Result<ChannelOf<C>, AppenderError> {
        let mut state = self.state.lock().await;
        self.ensure_channel(&mut state).await
    }

    /// Asserts the topology and remembers it for recovery. When no channel can be
    /// opened, the declaration is retried on the next channel that is.
    pub async fn declare_topology(&self, topology: &Topology) -> Result<(), AppenderError> {
        let mut state = self.state.lock().await;
        let channel = match self.ensure_channel(&mut state).await {
            Ok(channel) => channel,
            Err(error) => {
                state.topology = Some(topology.clone());
                state.topology_pending = true;
                return Err(error);
            }
        };
        state.topology = Some(topology.clone());
        let result = assert_topology(&channel, topology).await;
        state.topology_pending = matches!(result, Err(AppenderError::Connectivity(_)));
        result
    }

    pub async fn publish(
        &self,
        route: &Route,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<(), AppenderError> {
        let mut state = self.state.lock().await;
        let channel = self.ensure_channel(&mut state).await?;
        channel
            .basic_publish(&route.exchange, &route.routing_key, properties, body)
            .await
            .map_err(|e| AppenderError::PublishFailure {
                correlation_id: properties.correlation_id.clone(),
                reason: e.to_string(),
            })
    }

    pub async fn is_connected(&self) -> bool {
        let state = self.state.lock().await;
        state
            .connection
            .as_ref()
            .is_some_and(BrokerConnection::is_open)
    }

    /// Closes the channel, then the connection. Each close runs whether or not the
    /// other failed; failures are returned, never raised. The manager stays inert
    /// afterwards.
    pub async fn close(&self, timeout: Duration) -> Vec<AppenderError> {
        let Ok(mut state) = tokio::time::timeout(timeout, self.state.lock()).await else {
            return vec![AppenderError::ShutdownFailure {
                resource: Resource::Connection,
                reason: format!("connection state still busy after {timeout:?}"),
            }];
        };
        state.closed = true;

        let mut failures = Vec::new();

        if let Some(channel) = state.channel.take()
            && channel.is_open()
        {
            match close_within(timeout, channel.close()).await {
                Ok(()) => debug!("Channel closed"),
                Err(reason) => failures.push(AppenderError::ShutdownFailure {
                    resource: Resource::Channel,
                    reason,
                }),
            }
        }

        if let Some(connection) = state.connection.take()
            && connection.is_open()
        {
            match close_within(timeout, connection.close()).await {
                Ok(()) => info!(broker = %self.options.display_address(), "Broker connection closed"),
                Err(reason) => failures.push(AppenderError::ShutdownFailure {
                    resource: Resource::Connection,
                    reason,
                }),
            }
        }

        failures
    }

    async fn ensure_channel(
        &self,
        state: &mut ConnectionState<C>,
    ) -> Result<ChannelOf<C>, AppenderError> {
        if state.closed {
            return Err(AppenderError::Connectivity(
                "connection manager is closed".to_string(),
            ));
        }

        let mut reconnected = false;
        if !state
            .connection
            .as_ref()
            .is_some_and(BrokerConnection::is_open)
        {
            reconnected = self.connect(state).await?;
        }

        if let Some(channel) = state.channel.as_ref().filter(|c| c.is_open()) {
            return Ok(channel.clone());
        }

        let connection = state.connection.as_ref().ok_or_else(|| {
            AppenderError::Connectivity("no connection available".to_string())
        })?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| AppenderError::Connectivity(format!("creating channel: {e}")))?;
        debug!("Channel created");

        let recover = reconnected && self.options.topology_recovery;
        if let Some(topology) = state.topology.as_ref()
            && (recover || state.topology_pending)
        {
            info!(reconnected, "Asserting broker topology on new channel");
            let result = assert_topology(&channel, topology).await;
            state.topology_pending = matches!(result, Err(AppenderError::Connectivity(_)));
            result?;
        }

        state.channel = Some(channel.clone());
        Ok(channel)
    }

    /// Opens a fresh connection. Returns `true` when it replaces one that was lost.
    async fn connect(&self, state: &mut ConnectionState<C>) -> Result<bool, AppenderError> {
        if self.options.automatic_recovery
            && let Some(failed_at) = state.last_connect_failure
        {
            let interval = self.options.recovery_interval();
            let elapsed = failed_at.elapsed();
            if elapsed < interval {
                return Err(AppenderError::Connectivity(format!(
                    "reconnect to {} suppressed for another {:?}",
                    self.options.display_address(),
                    interval - elapsed
                )));
            }
        }

        // A channel never outlives its connection.
        state.channel = None;
        state.connection = None;

        match self.connector.connect(&self.options).await {
            Ok(connection) => {
                let reconnected = state.connected_before;
                state.connected_before = true;
                state.last_connect_failure = None;
                state.connection = Some(connection);
                info!(
                    broker = %self.options.display_address(),
                    reconnected,
                    "Broker connection established"
                );
                Ok(reconnected)
            }
            Err(error) => {
                state.last_connect_failure = Some(Instant::now());
                warn!(broker = %self.options.display_address(), %error, "Broker connection failed");
                Err(AppenderError::Connectivity(error.to_string()))
            }
        }
    }
}

async fn close_within<F>(timeout: Duration, close: F) -> Result<(), String>
where
    F: Future<Output = Result<(), BrokerError>>,
{
    match tokio::time::timeout(timeout, close).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(error.to_string()),
        Err(_) => Err(format!("timed out after {timeout:?}")),
    }
}
