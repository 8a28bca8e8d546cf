//! Handler trait and the errors a handler can report.

use thiserror::Error;

use crate::{agent_handler::JournalError, log_record::LogRecord, transport::FrameError};

/// Failures raised while handling a record.
///
/// Handlers never surface these from their logging entry points; they are
/// routed to the handler's error-reporting path instead.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("journal write failed: {0}")]
    Journal(#[from] JournalError),
    #[error("frame encoding failed: {0}")]
    Frame(#[from] FrameError),
    #[error("handler is closed")]
    Closed,
}

/// Trait implemented by log handlers.
///
/// Handlers are shared between producer threads, so `handle` takes `&self`
/// and must not block on network I/O.
pub trait Handler: Send + Sync {
    /// Dispatch a log record for handling.
    fn handle(&self, record: &LogRecord) -> Result<(), HandlerError>;

    /// Push buffered records towards their destination.
    ///
    /// Returns `false` when the handler can no longer deliver records.
    fn flush(&self) -> bool {
        true
    }

    /// Flush and release resources. Calling `close` twice is a no-op.
    fn close(&self) {}
}
