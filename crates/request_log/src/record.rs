//! The ordered key-value record assembled for every logged request.

use std::{borrow::Cow, time::Duration};

use bytes::Bytes;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// A typed value attached to a [`LogRecord`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    /// A text value.
    Str(String),

    /// An integer value.
    Int(u64),

    /// A duration, serialized as fractional milliseconds.
    Duration(Duration),

    /// A raw payload, serialized as (lossy) UTF-8 text.
    Bytes(Bytes),

    /// The textual representation of an error.
    Error(String),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Str(value) | Self::Error(value) => serializer.serialize_str(value),
            Self::Int(value) => serializer.serialize_u64(*value),
            Self::Duration(value) => serializer.serialize_f64(value.as_secs_f64() * 1_000.0),
            Self::Bytes(value) => serializer.serialize_str(&String::from_utf8_lossy(value)),
        }
    }
}

/// An ordered mapping from field names to values.
///
/// Keys keep their first insertion position; inserting an existing key replaces its value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogRecord {
    entries: Vec<(Cow<'static, str>, FieldValue)>,
}

impl LogRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty record with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Inserts a value, replacing the value of an existing entry with the same key.
    pub fn insert(&mut self, key: impl Into<Cow<'static, str>>, value: FieldValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Attaches a text value.
    pub fn str(&mut self, key: impl Into<Cow<'static, str>>, value: impl Into<String>) {
        self.insert(key, FieldValue::Str(value.into()));
    }

    /// Attaches an integer value.
    pub fn int(&mut self, key: impl Into<Cow<'static, str>>, value: u64) {
        self.insert(key, FieldValue::Int(value));
    }

    /// Attaches a duration.
    pub fn duration(&mut self, key: impl Into<Cow<'static, str>>, value: Duration) {
        self.insert(key, FieldValue::Duration(value));
    }

    /// Attaches a raw payload.
    pub fn bytes(&mut self, key: impl Into<Cow<'static, str>>, value: Bytes) {
        self.insert(key, FieldValue::Bytes(value));
    }

    /// Attaches an error message.
    pub fn error(&mut self, key: impl Into<Cow<'static, str>>, value: impl Into<String>) {
        self.insert(key, FieldValue::Error(value.into()));
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Returns `true` if the record holds a value under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterates over the keys in record order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_ref())
    }

    /// Iterates over the entries in record order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(key, value)| (key.as_ref(), value))
    }

    /// Number of entries in the record.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the record has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for LogRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key.as_ref(), value)?;
        }
        map.end()
    }
}
