use super::Appender;
use crate::broker::{Connector, LapinConnector};
use crate::domain::{Location, LogEvent, Severity, ThrowableInfo};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Targets never forwarded: the publisher's own logs and its AMQP stack.
pub const EXCLUDED_TARGETS: &[&str] = &[
    "rask_log_publisher",
    "lapin",
    "amq_protocol",
    "pinky_swear",
    "async_io",
    "polling",
];

/// Forwards every `tracing` event accepted by the subscriber's filter to an [`Appender`].
pub struct AmqpLayer<C: Connector = LapinConnector> {
    appender: Appender<C>,
    excluded: Vec<String>,
}

impl<C: Connector> AmqpLayer<C> {
    pub fn new(appender: Appender<C>) -> Self {
        Self {
            appender,
            excluded: EXCLUDED_TARGETS.iter().map(|t| (*t).to_string()).collect(),
        }
    }

    /// Also skip events whose target is `prefix` or below it.
    pub fn exclude_target(mut self, prefix: impl Into<String>) -> Self {
        self.excluded.push(prefix.into());
        self
    }

    fn is_excluded(&self, target: &str) -> bool {
        self.excluded.iter().any(|prefix| {
            target
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        })
    }
}

impl<S, C> Layer<S> for AmqpLayer<C>
where
    S: Subscriber,
    C: Connector,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !self.appender.is_active() || self.is_excluded(metadata.target()) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut log_event = LogEvent::new(
            Severity::from(metadata.level()),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        )
        .with_location(Location {
            module: metadata.module_path().map(str::to_string),
            function: None,
            file: metadata.file().map(str::to_string),
            line: metadata.line(),
        });
        log_event.fields = visitor.fields;
        log_event.throwable = visitor.throwable;

        self.appender.append(&log_event);
    }
}

#[derive(Default)]
struct EventVisitor {
    message: Option<String>,
    fields: BTreeMap<String, Value>,
    throwable: Option<ThrowableInfo>,
}

impl EventVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(text) => text,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, json!(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, json!(value));
    }

    // The first error field becomes the event's throwable; its class is the field name.
    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if self.throwable.is_none() {
            self.throwable = Some(ThrowableInfo::from_error(field.name(), value));
        }
        self.insert(field, json!(value.to_string()));
    }
}
