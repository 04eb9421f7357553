//! JSON layouts turning a [`LogEvent`] into a message body.

pub mod logstash;
pub mod simple;

pub use logstash::LogstashLayout;
pub use simple::SimpleJsonLayout;

use crate::domain::{LogEvent, ThrowableInfo};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Deepest level of detail [`LogstashLayout`] knows about.
pub const MAX_DEPTH: u8 = 3;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Serializes one event into a ready-to-send payload.
pub trait Layout: Send + Sync + 'static {
    fn format(&self, event: &LogEvent) -> Result<Bytes, LayoutError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    Simple,
    #[default]
    Logstash,
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LayoutKind::Simple => "simple",
            LayoutKind::Logstash => "logstash",
        })
    }
}

impl FromStr for LayoutKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(LayoutKind::Simple),
            "logstash" => Ok(LayoutKind::Logstash),
            _ => Err(format!("unknown layout '{s}'. Valid values: simple, logstash")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub kind: LayoutKind,
    /// Level of detail, `0..=3`. Only the logstash layout uses it.
    pub depth: u8,
    /// Static fields merged into every logstash document, overriding event fields.
    pub metadata: Map<String, Value>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            kind: LayoutKind::Logstash,
            depth: 1,
            metadata: Map::new(),
        }
    }
}

impl LayoutConfig {
    pub fn build(&self) -> Arc<dyn Layout> {
        match self.kind {
            LayoutKind::Simple => Arc::new(SimpleJsonLayout::new()),
            LayoutKind::Logstash => {
                Arc::new(LogstashLayout::new(self.depth).with_metadata(self.metadata.clone()))
            }
        }
    }
}

/// Adds `throwable` and `stackTrace` when the event carries error information.
pub(crate) fn render_throwable(document: &mut Map<String, Value>, throwable: Option<&ThrowableInfo>) {
    let Some(throwable) = throwable else {
        return;
    };

    let mut summary = Map::new();
    summary.insert("message".to_string(), json!(throwable.message));
    summary.insert("className".to_string(), json!(throwable.class_name));
    if !throwable.causes.is_empty() {
        summary.insert("causes".to_string(), json!(throwable.causes));
    }
    document.insert("throwable".to_string(), Value::Object(summary));

    let frames: Vec<Value> = throwable
        .stack_trace
        .iter()
        .map(|frame| {
            json!({
                "class": frame.class,
                "method": frame.method,
                "line": frame.line,
                "file": frame.file,
            })
        })
        .collect();
    document.insert("stackTrace".to_string(), Value::Array(frames));
}

/// Adds the event's structured fields under `fields`, if any.
pub(crate) fn render_fields(document: &mut Map<String, Value>, event: &LogEvent) {
    if event.fields.is_empty() {
        return;
    }
    let fields: Map<String, Value> = event
        .fields
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    document.insert("fields".to_string(), Value::Object(fields));
}

pub(crate) fn to_bytes(document: Map<String, Value>) -> Result<Bytes, LayoutError> {
    Ok(Bytes::from(serde_json::to_vec(&Value::Object(document))?))
}
