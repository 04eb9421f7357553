#![warn(rust_2018_idioms)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
#![allow(
    clippy::cast_possible_truncation, // Durations and sizes stay within realistic bounds
    clippy::missing_errors_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. BrokerError in broker module
    clippy::must_use_candidate,
    clippy::doc_markdown
)]

//! Publishes structured log events as JSON documents to an AMQP exchange.
//!
//! The [`Appender`] handle owns one lazily created broker connection/channel pair,
//! asserts the exchange/queue/binding topology once during activation and hands
//! every accepted event to a single background worker that publishes in
//! submission order.

pub mod app;
pub mod broker;
pub mod domain;
pub mod layout;
pub mod reliability;
pub mod sender;
pub mod test_support;

pub use app::{Appender, AppenderConfig, AmqpLayer, ConfigError};
pub use broker::{Connector, LapinConnector};
pub use domain::{AppenderError, LogEvent, Severity};
pub use reliability::{ErrorSink, TracingErrorSink};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
