use super::{Layout, LayoutError, MAX_DEPTH, render_fields, render_throwable, to_bytes};
use crate::domain::LogEvent;
use bytes::Bytes;
use chrono::SecondsFormat;
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Logstash-friendly document whose detail grows with `depth`:
///
/// | depth | adds                                         |
/// |-------|----------------------------------------------|
/// | 0     | `logId`, `logTime`, `level`, `message`, `loggerName` |
/// | 1     | `timestamp` (ISO-8601), `threadName`         |
/// | 2     | `className`, `methodName`, `lineNumber`      |
/// | 3     | `fileName`                                   |
///
/// Static metadata is merged last and wins over any generated key.
#[derive(Debug, Clone, Default)]
pub struct LogstashLayout {
    depth: u8,
    metadata: Map<String, Value>,
}

impl LogstashLayout {
    pub fn new(depth: u8) -> Self {
        Self {
            depth: depth.min(MAX_DEPTH),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }
}

impl Layout for LogstashLayout {
    fn format(&self, event: &LogEvent) -> Result<Bytes, LayoutError> {
        let mut document = Map::new();
        document.insert("logId".to_string(), json!(Uuid::new_v4().to_string()));
        document.insert("logTime".to_string(), json!(event.timestamp.timestamp_millis()));
        if self.depth >= 1 {
            document.insert(
                "timestamp".to_string(),
                json!(event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        document.insert("level".to_string(), json!(event.severity.as_str()));
        document.insert("message".to_string(), json!(event.message));
        document.insert("loggerName".to_string(), json!(event.logger));
        if self.depth >= 1 {
            document.insert("threadName".to_string(), json!(event.thread_name));
        }
        if self.depth >= 2 {
            let location = event.location.clone().unwrap_or_default();
            document.insert("className".to_string(), json!(location.module));
            document.insert("methodName".to_string(), json!(location.function));
            document.insert("lineNumber".to_string(), json!(location.line));
            if self.depth >= 3 {
                document.insert("fileName".to_string(), json!(location.file));
            }
        }

        render_throwable(&mut document, event.throwable.as_ref());
        render_fields(&mut document, event);

        for (key, value) in &self.metadata {
            document.insert(key.clone(), value.clone());
        }

        to_bytes(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, Severity};
    use chrono::{TimeZone, Utc};

    fn event() -> LogEvent {
        LogEvent::new(Severity::Info, "billing", "invoice sent")
            .with_timestamp(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap())
            .with_location(Location {
                module: Some("billing::invoice".to_string()),
                function: None,
                file: Some("src/invoice.rs".to_string()),
                line: Some(42),
            })
    }

    fn render(layout: &LogstashLayout) -> Value {
        serde_json::from_slice(&layout.format(&event()).unwrap()).unwrap()
    }

    #[test]
    fn test_depth_zero_is_minimal() {
        let document = render(&LogstashLayout::new(0));
        assert!(document["logId"].is_string());
        assert_eq!(document["logTime"], 1_700_000_000_123_i64);
        assert_eq!(document["loggerName"], "billing");
        assert!(document.get("timestamp").is_none());
        assert!(document.get("threadName").is_none());
        assert!(document.get("className").is_none());
    }

    #[test]
    fn test_depth_one_adds_iso_timestamp() {
        let document = render(&LogstashLayout::new(1));
        assert_eq!(document["timestamp"], "2023-11-14T22:13:20.123Z");
        assert!(document["threadName"].is_string());
        assert!(document.get("lineNumber").is_none());
    }

    #[test]
    fn test_depth_three_adds_location() {
        let document = render(&LogstashLayout::new(3));
        assert_eq!(document["className"], "billing::invoice");
        assert_eq!(document["methodName"], Value::Null);
        assert_eq!(document["lineNumber"], 42);
        assert_eq!(document["fileName"], "src/invoice.rs");
    }

    #[test]
    fn test_depth_is_clamped() {
        assert_eq!(LogstashLayout::new(9).depth(), MAX_DEPTH);
    }

    #[test]
    fn test_metadata_overrides_generated_keys() {
        let mut metadata = Map::new();
        metadata.insert("service".to_string(), json!("billing-api"));
        metadata.insert("level".to_string(), json!("AUDIT"));
        let document = render(&LogstashLayout::new(1).with_metadata(metadata));

        assert_eq!(document["service"], "billing-api");
        assert_eq!(document["level"], "AUDIT");
    }

    #[test]
    fn test_log_ids_are_unique() {
        let layout = LogstashLayout::new(0);
        let first = render(&layout);
        let second = render(&layout);
        assert_ne!(first["logId"], second["logId"]);
    }
}
