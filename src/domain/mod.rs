//! Domain layer for rask-log-publisher.
//!
//! Contains the canonical types shared across all modules:
//! - `LogEvent`: a host log record that already passed the severity threshold
//! - `Severity`: the level label published as the AMQP `type` property
//! - `AppenderError`: everything reported to the error sink

pub mod error;
pub mod log_event;
pub mod severity;

pub use error::{AppenderError, Resource};
pub use log_event::{Location, LogEvent, StackFrame, ThrowableInfo};
pub use severity::Severity;
