use super::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A log record handed over by the host logging pipeline.
///
/// The host has already applied its severity threshold; everything that reaches the
/// appender is meant to be published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    /// Logger or source name (a `tracing` target, a module path, ...).
    pub logger: String,
    pub thread_name: String,
    pub location: Option<Location>,
    pub throwable: Option<ThrowableInfo>,
    /// Structured key/value pairs attached to the record.
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogEvent {
    /// Event stamped now, on the current thread.
    pub fn new(severity: Severity, logger: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            logger: logger.into(),
            thread_name: current_thread_name(),
            location: None,
            throwable: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_throwable(mut self, throwable: ThrowableInfo) -> Self {
        self.throwable = Some(throwable);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Source position of the statement that produced the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub module: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Error information attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrowableInfo {
    pub class_name: String,
    pub message: String,
    pub stack_trace: Vec<StackFrame>,
    /// Messages of the `source()` chain, outermost first.
    pub causes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub class: String,
    pub method: String,
    pub line: Option<u32>,
    pub file: Option<String>,
}

impl ThrowableInfo {
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            stack_trace: Vec::new(),
            causes: Vec::new(),
        }
    }

    /// Captures the error's display text and its source chain.
    pub fn from_error(class_name: impl Into<String>, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut info = Self::new(class_name, error.to_string());
        let mut source = error.source();
        while let Some(cause) = source {
            info.causes.push(cause.to_string());
            source = cause.source();
        }
        info
    }

    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.stack_trace.push(frame);
        self
    }
}

pub(crate) fn current_thread_name() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}
