use crate::broker::{ConnectionManager, Connector, MessageProperties, Route};
use crate::domain::{AppenderError, Severity};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// One log event ready to go on the wire. Executed exactly once.
#[derive(Debug, Clone)]
pub struct PublishTask {
    identifier: Arc<str>,
    sequence: u64,
    timestamp: DateTime<Utc>,
    severity: Severity,
    content_type: &'static str,
    expiration: Option<Duration>,
    payload: Bytes,
}

impl PublishTask {
    pub fn new(
        identifier: Arc<str>,
        sequence: u64,
        timestamp: DateTime<Utc>,
        severity: Severity,
        expiration: Option<Duration>,
        payload: Bytes,
    ) -> Self {
        Self {
            identifier,
            sequence,
            timestamp,
            severity,
            content_type: JSON_CONTENT_TYPE,
            expiration: expiration.filter(|ttl| !ttl.is_zero()),
            payload,
        }
    }

    pub fn correlation_id(&self) -> String {
        compose_correlation_id(&self.identifier, &self.timestamp, self.sequence)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn properties(&self) -> MessageProperties {
        MessageProperties {
            app_id: self.identifier.to_string(),
            correlation_id: self.correlation_id(),
            kind: self.severity.as_str().to_string(),
            content_type: self.content_type.to_string(),
            expiration: self.expiration.map(|ttl| ttl.as_millis().to_string()),
            timestamp: u64::try_from(self.timestamp.timestamp()).ok(),
        }
    }

    /// Publishes the payload. Any failure, including a failed channel acquisition,
    /// comes back as a [`AppenderError::PublishFailure`] naming this task.
    pub async fn execute<C: Connector>(
        &self,
        manager: &ConnectionManager<C>,
        route: &Route,
    ) -> Result<(), AppenderError> {
        let properties = self.properties();
        match manager.publish(route, &properties, &self.payload).await {
            Ok(()) => Ok(()),
            Err(failure @ AppenderError::PublishFailure { .. }) => Err(failure),
            Err(other) => Err(AppenderError::PublishFailure {
                correlation_id: properties.correlation_id,
                reason: other.to_string(),
            }),
        }
    }
}

/// `identifier:epoch_millis:sequence`, unique per appender.
pub fn compose_correlation_id(identifier: &str, timestamp: &DateTime<Utc>, sequence: u64) -> String {
    format!("{identifier}:{}:{sequence}", timestamp.timestamp_millis())
}
