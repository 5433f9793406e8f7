//! Sinks that request log records are emitted to.

mod json;
mod tracing_event;

use std::fmt;

pub use tracing::Level;

pub use self::{json::JsonLogger, tracing_event::TracingLogger};
use crate::record::LogRecord;

/// A structured logging sink.
///
/// The middleware calls [`Logger::log`] exactly once for every request it does not skip.
/// Implementations are shared between concurrently handled requests and must not block for
/// longer than writing a single line takes.
pub trait Logger: Send + Sync + fmt::Debug {
    /// Emits `record` at severity `level` with `message` as its primary text.
    ///
    /// Emission is fire-and-forget; failures are not reported back to the caller.
    fn log(&self, level: Level, message: &str, record: &LogRecord);
}

/// Errors that can occur while building or using a logger.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// Represents an error in configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Represents an error during JSON serialization.
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// Represents an error while writing a log line.
    #[error("Failed to write log line: {0}")]
    Io(#[from] std::io::Error),
}
