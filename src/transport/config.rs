//! Configuration consumed by the transport worker.
//!
//! `AgentHandlerBuilder` constructs these values before passing them to the
//! [`IoWorker`](super::IoWorker) for runtime use.

use std::time::Duration;

/// Default collector host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default collector port.
pub const DEFAULT_PORT: u16 = 8888;
/// Default per-iteration I/O budget of the worker loop.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(500);
/// Default connection timeout applied when establishing sockets.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default upper bound on how long `stop` waits for the worker to exit.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// No point writing or reading more than a default socket buffer at once.
pub const DEFAULT_MAX_WRITE_SIZE: usize = 212_992;
pub const DEFAULT_MAX_READ_SIZE: usize = 212_992;

/// Connection and loop timing for one collector.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Read/write timeout on the socket and the cadence of the worker loop.
    pub io_timeout: Duration,
    pub connect_timeout: Duration,
    /// How long `stop` waits for the worker thread before detaching it.
    pub shutdown_timeout: Duration,
    pub max_write_size: usize,
    pub max_read_size: usize,
    /// Log every acknowledged chunk id at debug level.
    pub log_acks: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_write_size: DEFAULT_MAX_WRITE_SIZE,
            max_read_size: DEFAULT_MAX_READ_SIZE,
            log_acks: false,
        }
    }
}

impl TransportConfig {
    /// Override the collector address.
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Override the I/O timeout.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }
}
