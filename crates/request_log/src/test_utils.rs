use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
};

use serde_json::Value;
use tracing_subscriber::fmt::MakeWriter;

use crate::{Level, LogRecord, Logger};

/// In-memory writer shared between a logger and the test inspecting its output.
#[derive(Clone, Debug, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

#[allow(clippy::unwrap_used)]
impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub(crate) fn lines(&self) -> Vec<Value> {
        self.contents()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("poisoned buffer"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// A single call to [`Logger::log`].
#[derive(Clone, Debug)]
pub(crate) struct Captured {
    pub(crate) level: Level,
    pub(crate) message: String,
    pub(crate) record: LogRecord,
}

/// Logger keeping every emitted record in memory.
#[derive(Debug, Default)]
pub(crate) struct CapturingLogger {
    entries: Mutex<Vec<Captured>>,
}

#[allow(clippy::unwrap_used)]
impl CapturingLogger {
    pub(crate) fn entries(&self) -> Vec<Captured> {
        self.entries.lock().unwrap().clone()
    }
}

#[allow(clippy::unwrap_used)]
impl Logger for CapturingLogger {
    fn log(&self, level: Level, message: &str, record: &LogRecord) {
        self.entries.lock().unwrap().push(Captured {
            level,
            message: message.to_owned(),
            record: record.clone(),
        });
    }
}
