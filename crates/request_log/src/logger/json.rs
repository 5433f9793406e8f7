//! Provides [`JsonLogger`], a [`Logger`] that writes every record as one JSON line.

use std::io::{self, Write};

use serde::ser::{SerializeMap, Serializer};
use serde_json::{
    ser::{CompactFormatter, Formatter},
    Value,
};
use time::format_description::well_known::Iso8601;
use tracing_subscriber::fmt::MakeWriter;

use super::{Level, Logger, LoggerError};
use crate::{keys, record::LogRecord};

/// A [`Logger`] that serializes records into JSON objects, one per line.
///
/// Every line carries the implicit `level` and `message` keys, a `time` key unless disabled
/// with [`JsonLogger::with_timestamp`], and a `hostname` key if enabled with
/// [`JsonLogger::with_hostname`]. Static context fields added with [`JsonLogger::with_field`]
/// come next, followed by the record fields in record order.
///
/// It requires a [`MakeWriter`] to determine the output destination and a
/// [`serde_json::ser::Formatter`] to control the JSON output style
/// (e.g., compact or pretty-printed).
///
/// # Example
///
/// ```
/// use request_log::{JsonLogger, Level, LogRecord, Logger};
///
/// let logger = JsonLogger::stderr()
///     .with_field("service", "billing")
///     .expect("`service` is not a reserved key");
///
/// let mut record = LogRecord::new();
/// record.int("status", 200);
/// logger.log(Level::INFO, "Success", &record);
/// ```
#[derive(Clone, Debug)]
pub struct JsonLogger<W, F = CompactFormatter>
where
    W: for<'a> MakeWriter<'a> + 'static,
    F: Formatter + Clone,
{
    dst_writer: W,
    formatter: F,
    timestamp: bool,
    hostname: Option<String>,
    static_fields: Vec<(String, Value)>,
}

impl JsonLogger<fn() -> io::Stderr> {
    /// Creates a compact logger writing to standard error, with timestamps.
    ///
    /// This is the logger used by the middleware when none is configured.
    pub fn stderr() -> Self {
        Self::new(io::stderr, CompactFormatter)
    }
}

#[cfg(feature = "non-blocking")]
impl JsonLogger<tracing_appender::non_blocking::NonBlocking> {
    /// Creates a compact logger handing lines off to a background thread writing to `writer`.
    ///
    /// Lines are written as long as the returned guard is in scope.
    pub fn non_blocking<T>(writer: T) -> (Self, tracing_appender::non_blocking::WorkerGuard)
    where
        T: Write + Send + 'static,
    {
        let (non_blocking, guard) = tracing_appender::non_blocking(writer);
        (Self::new(non_blocking, CompactFormatter), guard)
    }
}

impl<W, F> JsonLogger<W, F>
where
    W: for<'a> MakeWriter<'a> + 'static,
    F: Formatter + Clone,
{
    /// Creates a new [`JsonLogger`] with the specified writer and formatter.
    pub fn new(dst_writer: W, formatter: F) -> Self {
        Self {
            dst_writer,
            formatter,
            timestamp: true,
            hostname: None,
            static_fields: Vec::new(),
        }
    }

    /// Enables or disables the implicit `time` key.
    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.timestamp = enabled;
        self
    }

    /// Adds the implicit `hostname` key, resolved once here.
    pub fn with_hostname(mut self) -> Self {
        self.hostname = Some(gethostname::gethostname().to_string_lossy().into_owned());
        self
    }

    /// Adds a static field logged with every record, after the implicit keys.
    ///
    /// Typically used on a clone of a shared logger to build per-request loggers carrying
    /// contextual data such as a trace ID.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Configuration`] if `key` is one of the implicit keys.
    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, LoggerError> {
        let key = key.into();
        if keys::IMPLICIT_KEYS.contains(key.as_str()) {
            return Err(LoggerError::Configuration(format!(
                "A reserved key `{key}` was used as a static field of the JSON logger"
            )));
        }

        let value = value.into();
        match self
            .static_fields
            .iter_mut()
            .find(|(existing, _)| *existing == key)
        {
            Some((_, slot)) => *slot = value,
            None => self.static_fields.push((key, value)),
        }
        Ok(self)
    }

    /// Serializes implicit fields.
    fn serialize_implicit_fields(
        &self,
        map_serializer: &mut impl SerializeMap<Error = serde_json::Error>,
        level: Level,
    ) -> Result<(), LoggerError> {
        map_serializer.serialize_entry(keys::LEVEL, &format_args!("{level}"))?;

        if self.timestamp {
            if let Ok(time) = time::UtcDateTime::now().format(&Iso8601::DEFAULT) {
                map_serializer.serialize_entry(keys::TIME, &time)?;
            }
        }

        if let Some(hostname) = &self.hostname {
            map_serializer.serialize_entry(keys::HOSTNAME, hostname)?;
        }

        Ok(())
    }

    /// Serializes a record into a single JSON object.
    fn serialize(
        &self,
        level: Level,
        message: &str,
        record: &LogRecord,
    ) -> Result<Vec<u8>, LoggerError> {
        let mut buffer = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut buffer, self.formatter.clone());
        let mut map_serializer = serializer.serialize_map(None)?;

        self.serialize_implicit_fields(&mut map_serializer, level)?;

        for (key, value) in &self.static_fields {
            map_serializer.serialize_entry(key, value)?;
        }

        for (key, value) in record.iter() {
            if keys::IMPLICIT_KEYS.contains(key) {
                tracing::warn!(
                    "Attempting to log a reserved key `{key}` (value: `{value:?}`) via a request \
                     log record. Skipping."
                );
            } else {
                map_serializer.serialize_entry(key, value)?;
            }
        }

        map_serializer.serialize_entry(keys::MESSAGE, message)?;
        map_serializer.end()?;
        Ok(buffer)
    }

    /// Flush memory buffer into an output stream with a trailing newline.
    ///
    /// Should be done by a single `write_all` call to avoid fragmentation of log because of
    /// multithreading.
    fn flush(&self, mut buffer: Vec<u8>) -> Result<(), LoggerError> {
        buffer.write_all(b"\n")?;
        self.dst_writer.make_writer().write_all(&buffer)?;
        Ok(())
    }
}

impl<W, F> Logger for JsonLogger<W, F>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + std::fmt::Debug + 'static,
    F: Formatter + Clone + Send + Sync + std::fmt::Debug,
{
    fn log(&self, level: Level, message: &str, record: &LogRecord) {
        let _ = self
            .serialize(level, message, record)
            .and_then(|serialized| self.flush(serialized));
    }
}
