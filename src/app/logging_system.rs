use super::{AmqpLayer, Appender};
use crate::broker::Connector;
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Quiets the AMQP client stack unless asked otherwise.
pub const DEFAULT_DIRECTIVES: &[&str] = &["lapin=warn", "amq_protocol=warn", "pinky_swear=warn"];

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: ParseError,
    },
    #[error("Failed to set global tracing subscriber: {0}")]
    AlreadyInitialized(String),
}

/// Builds the process-wide subscriber: an `EnvFilter`, a console `fmt` layer and,
/// optionally, an [`AmqpLayer`] shipping the same events to the broker.
#[derive(Debug, Clone)]
pub struct LoggingSystem {
    default_level: String,
    directives: Vec<String>,
    json: bool,
}

impl LoggingSystem {
    pub fn new(default_level: impl Into<String>) -> Self {
        Self {
            default_level: default_level.into(),
            directives: DEFAULT_DIRECTIVES.iter().map(|d| (*d).to_string()).collect(),
            json: false,
        }
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Emit console output as JSON lines instead of the compact text format.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn build_filter_string(&self) -> String {
        std::iter::once(self.default_level.as_str())
            .chain(self.directives.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `RUST_LOG` wins over the configured directives when set.
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        let filter = std::env::var(EnvFilter::DEFAULT_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.build_filter_string());
        EnvFilter::try_new(&filter).map_err(|source| LoggingError::InvalidFilter { filter, source })
    }

    pub fn initialize(&self) -> Result<(), LoggingError> {
        self.install::<crate::broker::LapinConnector>(None)
    }

    /// Installs the subscriber with the appender attached as an extra layer.
    pub fn initialize_with<C: Connector>(&self, appender: Appender<C>) -> Result<(), LoggingError> {
        self.install(Some(AmqpLayer::new(appender)))
    }

    fn install<C: Connector>(&self, amqp: Option<AmqpLayer<C>>) -> Result<(), LoggingError> {
        let env_filter = self.env_filter()?;

        let (json_layer, text_layer) = if self.json {
            (
                Some(fmt::layer().json().with_target(true).with_current_span(false)),
                None,
            )
        } else {
            (
                None,
                Some(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true)
                        .compact(),
                ),
            )
        };

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .with(text_layer)
            .with(amqp);

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new("info")
    }
}
