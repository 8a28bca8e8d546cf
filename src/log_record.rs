//! Log record representation handed to the agent handler.
//!
//! A `LogRecord` pairs the caller's payload ([`LogEntry`]) with the metadata
//! the handler needs to route it: the logger name (used by the dynamic table
//! resolver), the severity, and the creation time used as the frame
//! timestamp when the payload carries no explicit `time` field.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    level::Level,
    value::{Map, Value},
};

/// The caller-supplied payload.
#[derive(Clone, Debug, PartialEq)]
pub enum LogEntry {
    /// Free-form nested mapping; flattened before shipping.
    Structured(Map),
    /// A single scalar or identifier value.
    Scalar(Value),
    /// A rendered message string.
    Message(String),
}

impl From<Map> for LogEntry {
    fn from(map: Map) -> Self {
        LogEntry::Structured(map)
    }
}

impl From<&str> for LogEntry {
    fn from(message: &str) -> Self {
        LogEntry::Message(message.to_owned())
    }
}

impl From<String> for LogEntry {
    fn from(message: String) -> Self {
        LogEntry::Message(message)
    }
}

impl From<Value> for LogEntry {
    fn from(value: Value) -> Self {
        match value {
            Value::Map(map) => LogEntry::Structured(map),
            other => LogEntry::Scalar(other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogRecord {
    /// Dotted name of the logger that produced the record.
    pub logger: String,
    pub level: Level,
    pub entry: LogEntry,
    /// Time the record was created.
    pub created: SystemTime,
}

impl LogRecord {
    /// Construct a record stamped with the current time.
    pub fn new(logger: &str, level: Level, entry: impl Into<LogEntry>) -> Self {
        Self {
            logger: logger.to_owned(),
            level,
            entry: entry.into(),
            created: SystemTime::now(),
        }
    }

    /// Override the creation time.
    pub fn with_created(mut self, created: SystemTime) -> Self {
        self.created = created;
        self
    }

    /// Creation time in whole seconds since the Unix epoch.
    pub fn created_epoch_seconds(&self) -> i64 {
        self.created
            .duration_since(UNIX_EPOCH)
            .map(|dur| i64::try_from(dur.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or_default()
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entry {
            LogEntry::Message(message) => write!(f, "{} - {}", self.level, message),
            LogEntry::Scalar(value) => write!(f, "{} - {}", self.level, value),
            LogEntry::Structured(map) => {
                write!(f, "{} - {}", self.level, Value::Map(map.clone()))
            }
        }
    }
}
