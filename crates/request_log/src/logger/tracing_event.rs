//! Provides [`TracingLogger`], a [`Logger`] forwarding records to the `tracing` ecosystem.

use super::{Level, Logger};
use crate::record::LogRecord;

/// Target of the events emitted by [`TracingLogger`].
pub(crate) const TARGET: &str = "request_log";

/// A [`Logger`] that emits every record as a `tracing` event.
///
/// `tracing` fields are declared statically, so the record is attached as a single `fields`
/// value holding its JSON serialization.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str, record: &LogRecord) {
        let Ok(fields) = serde_json::to_string(record) else {
            return;
        };

        if level == Level::ERROR {
            tracing::error!(target: TARGET, fields = %fields, "{message}");
        } else if level == Level::WARN {
            tracing::warn!(target: TARGET, fields = %fields, "{message}");
        } else if level == Level::INFO {
            tracing::info!(target: TARGET, fields = %fields, "{message}");
        } else if level == Level::DEBUG {
            tracing::debug!(target: TARGET, fields = %fields, "{message}");
        } else {
            tracing::trace!(target: TARGET, fields = %fields, "{message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SharedBuffer;

    #[test]
    fn emits_an_event_at_the_requested_level() {
        let buffer = SharedBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_ansi(false)
            .with_max_level(Level::WARN)
            .finish();

        let mut record = LogRecord::new();
        record.int("status", 404);

        tracing::subscriber::with_default(subscriber, || {
            TracingLogger.log(Level::WARN, "Client error", &record);
            TracingLogger.log(Level::INFO, "Success", &record);
        });

        let output = buffer.contents();
        assert_eq!(output.lines().count(), 1);
        assert!(output.contains("WARN"));
        assert!(output.contains("request_log"));
        assert!(output.contains("Client error"));
        assert!(output.contains(r#"fields={"status":404}"#));
    }
}
