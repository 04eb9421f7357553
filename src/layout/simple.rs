use super::{Layout, LayoutError, render_fields, render_throwable, to_bytes};
use crate::domain::LogEvent;
use bytes::Bytes;
use serde_json::{Map, json};

/// Flat document: `timestamp` (epoch ms), `level`, `message`, `logger`, `threadName`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleJsonLayout;

impl SimpleJsonLayout {
    pub fn new() -> Self {
        Self
    }
}

impl Layout for SimpleJsonLayout {
    fn format(&self, event: &LogEvent) -> Result<Bytes, LayoutError> {
        let mut document = Map::new();
        document.insert("timestamp".to_string(), json!(event.timestamp.timestamp_millis()));
        document.insert("level".to_string(), json!(event.severity.as_str()));
        document.insert("message".to_string(), json!(event.message));
        document.insert("logger".to_string(), json!(event.logger));
        document.insert("threadName".to_string(), json!(event.thread_name));
        render_throwable(&mut document, event.throwable.as_ref());
        render_fields(&mut document, event);
        to_bytes(document)
    }
}
