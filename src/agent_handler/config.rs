//! Configuration consumed by [`AgentHandler`](super::AgentHandler).
//!
//! [`AgentHandlerBuilder`](crate::handlers::AgentHandlerBuilder) validates
//! and assembles these values; tests may construct them directly.

use std::{path::PathBuf, time::Duration};

use crate::{
    level::Level,
    rate_limited_warner::DEFAULT_WARN_INTERVAL,
    transport::{DEFAULT_MAX_BACKUP, DEFAULT_WAIT_TIME, TransportConfig},
};

use super::table::{self, DYNAMIC_JOURNAL_TABLE};

/// Database used in the tag when none is configured.
pub const DEFAULT_DATABASE: &str = "contextlogic";
/// Table used by static handlers and as the dynamic fallback.
pub const DEFAULT_TABLE: &str = "default";
/// Number of queued frames pushed to the worker after every emit.
pub const DEFAULT_FLUSH_SIZE: usize = 10;
/// Logger-name segment after which the dynamic table name starts.
pub const DEFAULT_SENTINEL: &str = "td";
/// Separator placed between logger-name segments of a dynamic table.
pub const DEFAULT_JOINER: &str = "__";
/// Records below this level are ignored. The default accepts everything.
pub const DEFAULT_LEVEL: Level = Level::Trace;

/// How the destination table is chosen for each record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableMode {
    /// Every record goes to the named table.
    Static(String),
    /// The table is derived from the logger name.
    Dynamic {
        default_table: String,
        joiner: String,
        sentinel: String,
    },
}

impl Default for TableMode {
    fn default() -> Self {
        Self::Static(DEFAULT_TABLE.into())
    }
}

impl TableMode {
    /// Dynamic mode with the stock sentinel, joiner and fallback table.
    pub fn dynamic() -> Self {
        Self::Dynamic {
            default_table: DEFAULT_TABLE.into(),
            joiner: DEFAULT_JOINER.into(),
            sentinel: DEFAULT_SENTINEL.into(),
        }
    }

    /// Table receiving records from `logger`.
    pub fn resolve(&self, logger: &str) -> String {
        match self {
            Self::Static(table) => table.clone(),
            Self::Dynamic {
                default_table,
                joiner,
                sentinel,
            } => table::dynamic_table(logger, sentinel, joiner, default_table),
        }
    }

    /// Table directory used for the journal file.
    pub fn journal_table(&self) -> &str {
        match self {
            Self::Static(table) => table,
            Self::Dynamic { .. } => DYNAMIC_JOURNAL_TABLE,
        }
    }
}

/// Settings for one agent handler.
#[derive(Clone, Debug)]
pub struct AgentHandlerConfig {
    pub transport: TransportConfig,
    pub database: String,
    pub table: TableMode,
    /// Root of the local journal; `None` disables journaling.
    pub backup_dir: Option<PathBuf>,
    pub max_backlog: usize,
    pub flush_size: usize,
    /// Time a sent frame waits for its ack before it is resent.
    pub agent_timeout: Duration,
    pub level: Level,
    pub warn_interval: Duration,
    /// Metrics host label; derived from the machine hostname when unset.
    pub host_type: Option<String>,
}

impl Default for AgentHandlerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            database: DEFAULT_DATABASE.into(),
            table: TableMode::default(),
            backup_dir: None,
            max_backlog: DEFAULT_MAX_BACKUP,
            flush_size: DEFAULT_FLUSH_SIZE,
            agent_timeout: DEFAULT_WAIT_TIME,
            level: DEFAULT_LEVEL,
            warn_interval: DEFAULT_WARN_INTERVAL,
            host_type: None,
        }
    }
}

impl AgentHandlerConfig {
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_table(mut self, table: TableMode) -> Self {
        self.table = table;
        self
    }

    /// Tag prefix for frames bound for `table`.
    pub fn tag_for(&self, table: &str) -> String {
        format!("log.{}.{}", self.database, table)
    }
}
