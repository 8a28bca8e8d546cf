//! The public handler shipping records to a collector agent.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{error, warn};

use crate::{
    context::{ContextSource, NoContext},
    flatten::{FlatRecord, flatten, flatten_map, sanitize},
    handler::{Handler, HandlerError},
    log_record::{LogEntry, LogRecord},
    metrics::{NoopMetrics, SharedMetrics, TransportEvent},
    rate_limited_warner::RateLimitedWarner,
    transport::{BacklogBuffer, BacklogStats, Frame, IoWorker},
    value::Value,
};

use super::{
    config::AgentHandlerConfig,
    host::{host_type, local_hostname},
    journal::{Journal, JournalError},
};

pub const TABLE_KEY: &str = "__table__";
pub const PROJECT_KEY: &str = "__project__";
pub const TIME_KEY: &str = "time";

/// Handler turning log records into acknowledged frames for a collector.
///
/// `emit` flattens the record, journals it when a backup directory is
/// configured, queues one frame per flat record in the backlog, and pushes up
/// to `flush_size` queued frames to the I/O worker. It never blocks on the
/// network and never fails to the caller.
pub struct AgentHandler {
    config: AgentHandlerConfig,
    buffer: Arc<BacklogBuffer>,
    worker: IoWorker,
    journal: Option<Journal>,
    context: Arc<dyn ContextSource>,
    metrics: SharedMetrics,
    host_type: String,
    closed: AtomicBool,
    warner: RateLimitedWarner,
}

impl AgentHandler {
    /// Construct a handler without metrics or request context.
    pub fn with_config(config: AgentHandlerConfig) -> Result<Self, JournalError> {
        Self::from_parts(config, Arc::new(NoopMetrics), Arc::new(NoContext))
    }

    /// Construct a handler reporting to `metrics` and reading request
    /// identifiers from `context`.
    ///
    /// Fails only when the journal directory cannot be prepared.
    pub fn from_parts(
        config: AgentHandlerConfig,
        metrics: SharedMetrics,
        context: Arc<dyn ContextSource>,
    ) -> Result<Self, JournalError> {
        let host_type = config
            .host_type
            .clone()
            .unwrap_or_else(|| host_type(&local_hostname()));
        let journal = match &config.backup_dir {
            Some(dir) => Some(Journal::open(
                dir,
                &config.database,
                config.table.journal_table(),
            )?),
            None => None,
        };
        let buffer = Arc::new(
            BacklogBuffer::new(config.max_backlog, config.agent_timeout)
                .with_metrics(Arc::clone(&metrics), host_type.clone())
                .with_warn_interval(config.warn_interval),
        );
        let worker = IoWorker::with_metrics(
            config.transport.clone(),
            buffer.clone(),
            Arc::clone(&metrics),
            host_type.clone(),
        );
        Ok(Self {
            warner: RateLimitedWarner::new(config.warn_interval),
            config,
            buffer,
            worker,
            journal,
            context,
            metrics,
            host_type,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &AgentHandlerConfig {
        &self.config
    }

    /// Normalised host label attached to metrics.
    pub fn host_type(&self) -> &str {
        &self.host_type
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    pub fn backlog(&self) -> BacklogStats {
        self.buffer.stats()
    }

    /// Frames dropped because the backlog was full.
    pub fn dropped(&self) -> u64 {
        self.buffer.dropped()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the I/O worker holds a live collector connection.
    pub fn is_connected(&self) -> bool {
        self.worker.is_connected()
    }

    /// Handle `record`, reporting any failure instead of returning it.
    pub fn emit(&self, record: &LogRecord) {
        match self.handle(record) {
            Ok(()) | Err(HandlerError::Closed) => {}
            Err(err) => self.report_error(record, None, &err),
        }
    }

    /// Push up to `n` queued frames to the I/O worker.
    pub fn try_flush(&self, n: usize) {
        for frame in self.buffer.get_logs(n, true) {
            self.worker.send(frame);
        }
    }

    /// Flatten `record` into the flat records shipped for `table`.
    pub fn prepare(&self, record: &LogRecord, table: &str) -> Vec<FlatRecord> {
        let mut records = match &record.entry {
            LogEntry::Structured(entry) => {
                let mut entry = entry.clone();
                self.context.current().merge_into(&mut entry);
                sanitize(&flatten_map(&entry))
            }
            other => flatten(other),
        };
        for flat in &mut records {
            flat.insert(TABLE_KEY.into(), Value::from(table));
            flat.insert(PROJECT_KEY.into(), Value::from(self.config.database.as_str()));
            flat.retain(|_, value| !matches!(value, Value::Null));
        }
        records
    }

    fn enqueue(&self, tag: &str, record: &LogRecord, mut flat: FlatRecord) -> Result<(), HandlerError> {
        let explicit = flat
            .get(TIME_KEY)
            .filter(|value| value.is_truthy())
            .and_then(Value::as_epoch_seconds);
        let time = match explicit {
            Some(seconds) => {
                flat.insert(TIME_KEY.into(), Value::Int(seconds));
                seconds
            }
            None => record.created_epoch_seconds(),
        };
        let frame = Frame::encode(tag, time, &flat)?;
        self.buffer.add(frame.chunk, frame.bytes, false);
        Ok(())
    }

    fn record_closed_drop(&self) {
        self.warner.record_drop();
        self.warner.warn_if_due(|count| {
            warn!("AgentHandler dropped {count} records after close");
        });
    }

    fn count(&self, event: TransportEvent, tag: &str) {
        self.metrics.increment(
            event,
            &[("host", self.host_type.as_str()), ("tag", tag)],
        );
    }

    fn report_error(&self, record: &LogRecord, tag: Option<&str>, err: &HandlerError) {
        error!(
            "AgentHandler failed to handle record from logger '{}': {err}",
            record.logger
        );
        self.count(TransportEvent::HandlerErrors, tag.unwrap_or(""));
    }
}

impl Handler for AgentHandler {
    fn handle(&self, record: &LogRecord) -> Result<(), HandlerError> {
        if self.is_closed() {
            self.record_closed_drop();
            return Err(HandlerError::Closed);
        }
        if record.level < self.config.level {
            return Ok(());
        }
        let table = self.config.table.resolve(&record.logger);
        let tag = self.config.tag_for(&table);
        let records = self.prepare(record, &table);

        if let Some(journal) = &self.journal {
            if let Err(err) = journal.append(&records) {
                self.count(TransportEvent::JournalFailures, &tag);
                self.report_error(record, Some(&tag), &HandlerError::Journal(err));
            }
        }
        for flat in records {
            if let Err(err) = self.enqueue(&tag, record, flat) {
                self.report_error(record, Some(&tag), &err);
            }
        }
        self.try_flush(self.config.flush_size);
        Ok(())
    }

    fn flush(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.try_flush(self.config.max_backlog);
        true
    }

    /// Hand the whole backlog to the worker, then stop it.
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.try_flush(self.config.max_backlog);
        self.worker.stop();
        self.warner.flush(|count| {
            warn!("AgentHandler dropped {count} records in the last interval");
        });
    }
}

impl Drop for AgentHandler {
    fn drop(&mut self) {
        Handler::close(self);
    }
}

impl std::fmt::Debug for AgentHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandler")
            .field("database", &self.config.database)
            .field("table", &self.config.table)
            .field("host_type", &self.host_type)
            .field("backlog", &self.buffer.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}
