use std::fmt;
use thiserror::Error;

/// Broker resources released during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Worker,
    Channel,
    Connection,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Worker => "worker",
            Resource::Channel => "channel",
            Resource::Connection => "connection",
        })
    }
}

/// Failures reported to the error sink.
///
/// None of these ever cross the appender boundary as a returned error; the host
/// application keeps running whatever the broker does.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppenderError {
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Topology conflict: {0}")]
    TopologyConflict(String),

    #[error("Publish failure for {correlation_id}: {reason}")]
    PublishFailure {
        correlation_id: String,
        reason: String,
    },

    #[error("Shutdown failure while closing {resource}: {reason}")]
    ShutdownFailure { resource: Resource, reason: String },

    #[error("Appender is closed, event rejected")]
    Rejected,
}

impl AppenderError {
    pub fn is_publish_failure(&self) -> bool {
        matches!(self, AppenderError::PublishFailure { .. })
    }
}
