//! Builder for [`AgentHandler`](crate::agent_handler::AgentHandler).
//!
//! Every option is optional; unset options fall back to the `DEFAULT_*`
//! constants of the agent handler and transport modules. Setting any of
//! the dynamic-table options switches the handler to per-logger tables.

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use crate::{
    agent_handler::{
        AgentHandler, AgentHandlerConfig, DEFAULT_JOINER, DEFAULT_SENTINEL, DEFAULT_TABLE,
        TableMode,
    },
    context::{ContextSource, NoContext},
    handler::Handler,
    level::Level,
    metrics::{NoopMetrics, SharedMetrics},
};

use super::{
    HandlerBuildError, HandlerBuilderTrait,
    builder_macros::{ensure_positive, option_setter},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(super) struct DynamicTableOptions {
    pub(super) default_table: Option<String>,
    pub(super) joiner: Option<String>,
    pub(super) sentinel: Option<String>,
}

impl DynamicTableOptions {
    fn into_mode(self) -> TableMode {
        TableMode::Dynamic {
            default_table: self.default_table.unwrap_or_else(|| DEFAULT_TABLE.into()),
            joiner: self.joiner.unwrap_or_else(|| DEFAULT_JOINER.into()),
            sentinel: self.sentinel.unwrap_or_else(|| DEFAULT_SENTINEL.into()),
        }
    }
}

/// Builder for constructing [`AgentHandler`] instances.
#[derive(Clone, Default)]
pub struct AgentHandlerBuilder {
    pub(super) host: Option<String>,
    pub(super) port: Option<u16>,
    pub(super) database: Option<String>,
    pub(super) table: Option<String>,
    pub(super) dynamic: Option<DynamicTableOptions>,
    pub(super) backup_dir: Option<PathBuf>,
    pub(super) max_backlog: Option<usize>,
    pub(super) flush_size: Option<usize>,
    pub(super) agent_timeout: Option<Duration>,
    pub(super) io_timeout: Option<Duration>,
    pub(super) connect_timeout: Option<Duration>,
    pub(super) shutdown_timeout: Option<Duration>,
    pub(super) level: Option<Level>,
    pub(super) log_acks: Option<bool>,
    pub(super) warn_interval: Option<Duration>,
    pub(super) host_type: Option<String>,
    metrics: Option<SharedMetrics>,
    context: Option<Arc<dyn ContextSource>>,
}

impl AgentHandlerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target the collector at `host:port`.
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Send every record to one table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Derive tables from logger names using the default sentinel, joiner
    /// and fallback table.
    pub fn with_dynamic_table(mut self) -> Self {
        self.dynamic.get_or_insert_with(DynamicTableOptions::default);
        self
    }

    /// Table used by the dynamic variant when a logger name yields none.
    pub fn with_default_table(mut self, table: impl Into<String>) -> Self {
        self.dynamic_options().default_table = Some(table.into());
        self
    }

    /// Separator between logger-name segments of a dynamic table.
    pub fn with_joiner(mut self, joiner: impl Into<String>) -> Self {
        self.dynamic_options().joiner = Some(joiner.into());
        self
    }

    /// Logger-name segment after which the dynamic table starts.
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.dynamic_options().sentinel = Some(sentinel.into());
        self
    }

    /// Journal every record under `dir` before sending it.
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    option_setter!(
        #[doc = "Maximum number of unacknowledged frames kept in memory."]
        with_max_backlog,
        max_backlog,
        usize
    );
    option_setter!(
        #[doc = "Number of queued frames handed to the worker after each emit."]
        with_flush_size,
        flush_size,
        usize
    );
    option_setter!(
        #[doc = "Time a sent frame waits for its ack before being resent."]
        with_agent_timeout,
        agent_timeout,
        Duration
    );
    option_setter!(
        #[doc = "Budget of one worker iteration; zero means non-blocking I/O."]
        with_io_timeout,
        io_timeout,
        Duration
    );
    option_setter!(with_connect_timeout, connect_timeout, Duration);
    option_setter!(
        #[doc = "Upper bound on how long `close` waits for the worker thread."]
        with_shutdown_timeout,
        shutdown_timeout,
        Duration
    );
    option_setter!(with_level, level, Level);
    option_setter!(
        #[doc = "Log every acknowledged id at debug level."]
        with_log_acks,
        log_acks,
        bool
    );
    option_setter!(with_warn_interval, warn_interval, Duration);

    /// Override the host label attached to metrics.
    pub fn with_host_type(mut self, host_type: impl Into<String>) -> Self {
        self.host_type = Some(host_type.into());
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Read request identifiers from `context` for structured records.
    pub fn with_context(mut self, context: Arc<dyn ContextSource>) -> Self {
        self.context = Some(context);
        self
    }

    fn dynamic_options(&mut self) -> &mut DynamicTableOptions {
        self.dynamic.get_or_insert_with(DynamicTableOptions::default)
    }

    /// Check the options without building anything.
    pub fn validate(&self) -> Result<(), HandlerBuildError> {
        self.validate_target()?;
        self.validate_table()?;
        self.validate_sizes()?;
        Ok(())
    }

    fn validate_target(&self) -> Result<(), HandlerBuildError> {
        if self.host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err(HandlerBuildError::InvalidConfig(
                "host must not be empty".into(),
            ));
        }
        if let Some(port) = self.port {
            ensure_positive!(port, "port")?;
        }
        if self.database.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(HandlerBuildError::InvalidConfig(
                "database must not be empty".into(),
            ));
        }
        Ok(())
    }

    fn validate_table(&self) -> Result<(), HandlerBuildError> {
        if self.dynamic.is_some() && self.table.is_some() {
            return Err(HandlerBuildError::InvalidConfig(
                "table argument not supported with dynamic tables".into(),
            ));
        }
        if self.table.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(HandlerBuildError::InvalidConfig(
                "table must not be empty".into(),
            ));
        }
        if let Some(sentinel) = self.dynamic.as_ref().and_then(|d| d.sentinel.as_deref()) {
            if sentinel.is_empty() {
                return Err(HandlerBuildError::InvalidConfig(
                    "sentinel must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    fn validate_sizes(&self) -> Result<(), HandlerBuildError> {
        if let Some(max_backlog) = self.max_backlog {
            ensure_positive!(max_backlog, "max_backlog")?;
        }
        if let Some(flush_size) = self.flush_size {
            ensure_positive!(flush_size, "flush_size")?;
        }
        Ok(())
    }

    /// Validate and assemble the handler configuration.
    pub fn build_config(&self) -> Result<AgentHandlerConfig, HandlerBuildError> {
        self.validate()?;
        let mut config = AgentHandlerConfig::default();
        self.apply_transport(&mut config);
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        config.table = match (&self.table, &self.dynamic) {
            (_, Some(dynamic)) => dynamic.clone().into_mode(),
            (Some(table), None) => TableMode::Static(table.clone()),
            (None, None) => TableMode::default(),
        };
        config.backup_dir = self.backup_dir.clone();
        if let Some(max_backlog) = self.max_backlog {
            config.max_backlog = max_backlog;
        }
        if let Some(flush_size) = self.flush_size {
            config.flush_size = flush_size;
        }
        if let Some(timeout) = self.agent_timeout {
            config.agent_timeout = timeout;
        }
        if let Some(level) = self.level {
            config.level = level;
        }
        if let Some(interval) = self.warn_interval {
            config.warn_interval = interval;
        }
        config.host_type = self.host_type.clone();
        Ok(config)
    }

    fn apply_transport(&self, config: &mut AgentHandlerConfig) {
        let transport = &mut config.transport;
        if let Some(host) = &self.host {
            transport.host = host.clone();
        }
        if let Some(port) = self.port {
            transport.port = port;
        }
        if let Some(timeout) = self.io_timeout {
            transport.io_timeout = timeout;
        }
        if let Some(timeout) = self.connect_timeout {
            transport.connect_timeout = timeout;
        }
        if let Some(timeout) = self.shutdown_timeout {
            transport.shutdown_timeout = timeout;
        }
        if let Some(log_acks) = self.log_acks {
            transport.log_acks = log_acks;
        }
    }

    /// Build the handler. Fails on invalid options or when the journal
    /// directory cannot be created.
    pub fn build(&self) -> Result<AgentHandler, HandlerBuildError> {
        let config = self.build_config()?;
        let metrics = self
            .metrics
            .clone()
            .unwrap_or_else(|| Arc::new(NoopMetrics));
        let context = self
            .context
            .clone()
            .unwrap_or_else(|| Arc::new(NoContext));
        Ok(AgentHandler::from_parts(config, metrics, context)?)
    }
}

impl HandlerBuilderTrait for AgentHandlerBuilder {
    fn build_handler(&self) -> Result<Box<dyn Handler>, HandlerBuildError> {
        Ok(Box::new(self.build()?))
    }
}

impl fmt::Debug for AgentHandlerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHandlerBuilder")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("table", &self.table)
            .field("dynamic", &self.dynamic)
            .field("backup_dir", &self.backup_dir)
            .field("max_backlog", &self.max_backlog)
            .field("flush_size", &self.flush_size)
            .field("agent_timeout", &self.agent_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("level", &self.level)
            .field("has_metrics", &self.metrics.is_some())
            .field("has_context", &self.context.is_some())
            .finish_non_exhaustive()
    }
}
