use crate::broker::ExchangeType;
use crate::layout::{LayoutConfig, MAX_DEPTH};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Identifier used when none is configured and the host name cannot be read.
pub const FALLBACK_IDENTIFIER: &str = "rask-log-publisher";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
}

/// Resolved appender settings.
///
/// Units follow the field suffix: `_ms` milliseconds, `_secs` seconds, sizes in bytes.
/// A zero duration or limit means "not set".
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppenderConfig {
    pub host: String,
    pub port: u16,
    pub virtual_host: String,
    pub username: String,
    pub password: String,

    pub exchange_name: String,
    pub exchange_type: ExchangeType,
    pub exchange_durable: bool,

    pub queue_name: String,
    pub queue_durable: bool,
    pub queue_exclusive: bool,
    pub queue_auto_delete: bool,
    pub queue_max_length: u64,
    pub queue_max_length_bytes: u64,
    pub queue_message_ttl_ms: u64,

    pub routing_key: String,
    pub message_expiration_ms: u64,
    /// Producer id: AMQP `app_id`, connection name and correlation id prefix.
    pub identifier: Option<String>,

    pub automatic_recovery_enabled: bool,
    pub topology_recovery_enabled: bool,
    pub network_recovery_interval_ms: u64,
    pub connection_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub heartbeat_timeout_secs: u64,
    pub frame_size_limit: u32,
    pub shutdown_timeout_ms: u64,

    /// When false, activation is a no-op and every event is dropped.
    pub enabled: bool,
    /// Initial value of the runtime pause switch.
    pub activated: bool,

    pub layout: LayoutConfig,
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            virtual_host: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            exchange_name: "log-exchange".to_string(),
            exchange_type: ExchangeType::Direct,
            exchange_durable: true,
            queue_name: "log-queue".to_string(),
            queue_durable: true,
            queue_exclusive: false,
            queue_auto_delete: false,
            queue_max_length: 0,
            queue_max_length_bytes: 0,
            queue_message_ttl_ms: 0,
            routing_key: String::new(),
            message_expiration_ms: 0,
            identifier: None,
            automatic_recovery_enabled: true,
            topology_recovery_enabled: true,
            network_recovery_interval_ms: 0,
            connection_timeout_ms: 0,
            handshake_timeout_ms: 0,
            heartbeat_timeout_secs: 0,
            frame_size_limit: 0,
            shutdown_timeout_ms: 60_000,
            enabled: true,
            activated: true,
            layout: LayoutConfig::default(),
        }
    }
}

impl fmt::Debug for AppenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppenderConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("virtual_host", &self.virtual_host)
            .field("username", &self.username)
            .field("password", &"****")
            .field("exchange_name", &self.exchange_name)
            .field("exchange_type", &self.exchange_type)
            .field("exchange_durable", &self.exchange_durable)
            .field("queue_name", &self.queue_name)
            .field("queue_durable", &self.queue_durable)
            .field("queue_exclusive", &self.queue_exclusive)
            .field("queue_auto_delete", &self.queue_auto_delete)
            .field("queue_max_length", &self.queue_max_length)
            .field("queue_max_length_bytes", &self.queue_max_length_bytes)
            .field("queue_message_ttl_ms", &self.queue_message_ttl_ms)
            .field("routing_key", &self.routing_key)
            .field("message_expiration_ms", &self.message_expiration_ms)
            .field("identifier", &self.identifier)
            .field("automatic_recovery_enabled", &self.automatic_recovery_enabled)
            .field("topology_recovery_enabled", &self.topology_recovery_enabled)
            .field("network_recovery_interval_ms", &self.network_recovery_interval_ms)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("handshake_timeout_ms", &self.handshake_timeout_ms)
            .field("heartbeat_timeout_secs", &self.heartbeat_timeout_secs)
            .field("frame_size_limit", &self.frame_size_limit)
            .field("shutdown_timeout_ms", &self.shutdown_timeout_ms)
            .field("enabled", &self.enabled)
            .field("activated", &self.activated)
            .field("layout", &self.layout)
            .finish()
    }
}

impl AppenderConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppenderConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `RASK_AMQP_CONFIG` (inline TOML) if set, otherwise the individual
    /// `RASK_AMQP_*` variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(inline) = std::env::var("RASK_AMQP_CONFIG") {
            return Self::from_toml_str(&inline);
        }

        let mut config = AppenderConfig::default();

        load_env_string("RASK_AMQP_HOST", &mut config.host);
        load_env_var("RASK_AMQP_PORT", &mut config.port)?;
        load_env_string("RASK_AMQP_VHOST", &mut config.virtual_host);
        load_env_string("RASK_AMQP_USERNAME", &mut config.username);
        load_env_string("RASK_AMQP_PASSWORD", &mut config.password);

        load_env_string("RASK_AMQP_EXCHANGE", &mut config.exchange_name);
        load_env_var("RASK_AMQP_EXCHANGE_TYPE", &mut config.exchange_type)?;
        load_env_var("RASK_AMQP_EXCHANGE_DURABLE", &mut config.exchange_durable)?;

        load_env_string("RASK_AMQP_QUEUE", &mut config.queue_name);
        load_env_var("RASK_AMQP_QUEUE_DURABLE", &mut config.queue_durable)?;
        load_env_var("RASK_AMQP_QUEUE_EXCLUSIVE", &mut config.queue_exclusive)?;
        load_env_var("RASK_AMQP_QUEUE_AUTO_DELETE", &mut config.queue_auto_delete)?;
        load_env_var("RASK_AMQP_QUEUE_MAX_LENGTH", &mut config.queue_max_length)?;
        load_env_var("RASK_AMQP_QUEUE_MAX_LENGTH_BYTES", &mut config.queue_max_length_bytes)?;
        load_env_var("RASK_AMQP_QUEUE_MESSAGE_TTL_MS", &mut config.queue_message_ttl_ms)?;

        load_env_string("RASK_AMQP_ROUTING_KEY", &mut config.routing_key);
        load_env_var("RASK_AMQP_MESSAGE_EXPIRATION_MS", &mut config.message_expiration_ms)?;
        load_env_string_opt("RASK_AMQP_IDENTIFIER", &mut config.identifier);

        load_env_var("RASK_AMQP_AUTOMATIC_RECOVERY", &mut config.automatic_recovery_enabled)?;
        load_env_var("RASK_AMQP_TOPOLOGY_RECOVERY", &mut config.topology_recovery_enabled)?;
        load_env_var(
            "RASK_AMQP_NETWORK_RECOVERY_INTERVAL_MS",
            &mut config.network_recovery_interval_ms,
        )?;
        load_env_var("RASK_AMQP_CONNECTION_TIMEOUT_MS", &mut config.connection_timeout_ms)?;
        load_env_var("RASK_AMQP_HANDSHAKE_TIMEOUT_MS", &mut config.handshake_timeout_ms)?;
        load_env_var("RASK_AMQP_HEARTBEAT_SECS", &mut config.heartbeat_timeout_secs)?;
        load_env_var("RASK_AMQP_FRAME_SIZE_LIMIT", &mut config.frame_size_limit)?;
        load_env_var("RASK_AMQP_SHUTDOWN_TIMEOUT_MS", &mut config.shutdown_timeout_ms)?;

        load_env_var("RASK_AMQP_ENABLED", &mut config.enabled)?;
        load_env_var("RASK_AMQP_ACTIVATED", &mut config.activated)?;

        load_env_var("RASK_AMQP_LAYOUT", &mut config.layout.kind)?;
        load_env_var("RASK_AMQP_LAYOUT_DEPTH", &mut config.layout.depth)?;
        load_env_metadata("RASK_AMQP_METADATA", &mut config.layout.metadata)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Broker host must not be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "Broker port must be greater than 0".to_string(),
            ));
        }

        if self.exchange_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Exchange name must not be empty".to_string(),
            ));
        }

        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Queue name must not be empty".to_string(),
            ));
        }

        if let Some(identifier) = &self.identifier
            && identifier.trim().is_empty()
        {
            return Err(ConfigError::InvalidConfig(
                "Identifier must not be empty when set".to_string(),
            ));
        }

        if self.shutdown_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Shutdown timeout must be greater than 0".to_string(),
            ));
        }

        if self.layout.depth > MAX_DEPTH {
            return Err(ConfigError::InvalidConfig(format!(
                "Layout depth {} exceeds the maximum of {MAX_DEPTH}",
                self.layout.depth
            )));
        }

        Ok(())
    }

    /// Configured identifier, else the host name, else [`FALLBACK_IDENTIFIER`].
    pub fn resolved_identifier(&self) -> String {
        if let Some(identifier) = &self.identifier {
            return identifier.clone();
        }
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| FALLBACK_IDENTIFIER.to_string())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn message_expiration(&self) -> Option<Duration> {
        (self.message_expiration_ms > 0).then(|| Duration::from_millis(self.message_expiration_ms))
    }
}

/// Parses an environment variable into `target`. A missing variable keeps the default.
fn load_env_var<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *target = value
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

fn load_env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

fn load_env_string_opt(name: &str, target: &mut Option<String>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(value);
    }
}

/// Layout metadata is passed as a JSON object.
fn load_env_metadata(name: &str, target: &mut Map<String, Value>) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(name) {
        *target = serde_json::from_str(&value)
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutKind;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppenderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 5672);
        assert!(config.queue_durable);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(60));
        assert_eq!(config.message_expiration(), None);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            AppenderConfig {
                host: " ".to_string(),
                ..AppenderConfig::default()
            },
            AppenderConfig {
                port: 0,
                ..AppenderConfig::default()
            },
            AppenderConfig {
                queue_name: String::new(),
                ..AppenderConfig::default()
            },
            AppenderConfig {
                identifier: Some(String::new()),
                ..AppenderConfig::default()
            },
            AppenderConfig {
                shutdown_timeout_ms: 0,
                ..AppenderConfig::default()
            },
            AppenderConfig {
                layout: LayoutConfig {
                    depth: 4,
                    ..LayoutConfig::default()
                },
                ..AppenderConfig::default()
            },
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidConfig(_))),
                "expected rejection for {config:?}"
            );
        }
    }

    #[test]
    fn test_configured_identifier_wins() {
        let config = AppenderConfig {
            identifier: Some("billing-api".to_string()),
            ..AppenderConfig::default()
        };
        assert_eq!(config.resolved_identifier(), "billing-api");
    }

    #[test]
    fn test_identifier_falls_back_to_something_non_empty() {
        assert!(!AppenderConfig::default().resolved_identifier().is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppenderConfig::from_toml_str(
            r#"
            host = "rabbit.internal"
            exchange_type = "topic"
            queue_max_length = 1000

            [layout]
            kind = "simple"
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "rabbit.internal");
        assert_eq!(config.exchange_type, ExchangeType::Topic);
        assert_eq!(config.queue_max_length, 1000);
        assert_eq!(config.layout.kind, LayoutKind::Simple);
        assert_eq!(config.layout.depth, 1);
        assert_eq!(config.port, 5672);
    }

    #[test]
    fn test_debug_hides_password() {
        let config = AppenderConfig {
            password: "hunter2-secret".to_string(),
            ..AppenderConfig::default()
        };
        assert!(!format!("{config:?}").contains("hunter2-secret"));
    }
}
