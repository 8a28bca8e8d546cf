//! Worker thread driving collector I/O.
//!
//! The worker owns the socket. Each iteration of its loop gets an
//! `io_timeout` budget in which it (re)connects if needed, reads whatever
//! the collector sent, turns complete acknowledgments into
//! [`WorkerHooks::acknowledged`] calls, and writes as much of the pending
//! queue as the socket accepts. Producers only touch the pending queue
//! through [`IoWorker::send`].
//!
//! Network errors never leave this module: the connection is dropped, the
//! pending queue is discarded (bytes on the wire are assumed lost), and the
//! next iteration tries again. While no connection exists the pending queue
//! is discarded every iteration and the backlog takes its frames back, so
//! an outage costs no memory beyond the backlog itself.

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::{
    metrics::{NoopMetrics, SharedMetrics, TransportEvent},
    rate_limited_warner::{DEFAULT_WARN_INTERVAL, RateLimitedWarner},
};

use super::{
    config::TransportConfig,
    connection::{Connection, ReadOutcome},
    frame::{ACK_FRAME_SIZE, decode_ack},
    prefix::merge_prefix,
};

/// Shortest pause between loop iterations, even with a zero `io_timeout`.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Callbacks from the worker thread into the owner of the backlog.
pub trait WorkerHooks: Send + Sync {
    /// The collector acknowledged `chunk`.
    fn acknowledged(&self, chunk: &str);
    /// A connection was established; returns the frames to write first.
    fn connected(&self) -> VecDeque<Vec<u8>>;
    /// A live connection was torn down.
    fn disconnected(&self);
    /// Frames handed over with [`IoWorker::send`] were discarded without
    /// reaching a socket, either because no connection exists or because
    /// the worker is shutting down.
    fn unwritten(&self);
}

struct Shared {
    config: TransportConfig,
    hooks: Arc<dyn WorkerHooks>,
    metrics: SharedMetrics,
    host: String,
    pending: Mutex<VecDeque<Vec<u8>>>,
    stopped: AtomicBool,
    connected: AtomicBool,
}

impl Shared {
    fn count(&self, event: TransportEvent) {
        self.metrics
            .increment(event, &[("host", self.host.as_str())]);
    }
}

struct WorkerThread {
    handle: JoinHandle<()>,
    wake_tx: Sender<()>,
    done_rx: Receiver<()>,
}

/// Handle to the background I/O thread.
///
/// The thread is started lazily by the first [`send`](Self::send) and
/// restarted by a later `send` if it ever exits before [`stop`](Self::stop).
pub struct IoWorker {
    shared: Arc<Shared>,
    thread: Mutex<Option<WorkerThread>>,
}

impl IoWorker {
    pub fn new(config: TransportConfig, hooks: Arc<dyn WorkerHooks>) -> Self {
        Self::with_metrics(config, hooks, Arc::new(NoopMetrics), String::new())
    }

    /// Construct a worker reporting connection failures and invalid acks to
    /// `metrics` under the `host` label.
    pub fn with_metrics(
        config: TransportConfig,
        hooks: Arc<dyn WorkerHooks>,
        metrics: SharedMetrics,
        host: String,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                hooks,
                metrics,
                host,
                pending: Mutex::new(VecDeque::new()),
                stopped: AtomicBool::new(false),
                connected: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    /// Queue `frame` for writing. Ignored once the worker has been stopped.
    pub fn send(&self, frame: Vec<u8>) {
        if self.is_stopped() {
            return;
        }
        self.ensure_started();
        self.shared.pending.lock().push_back(frame);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Whether the worker currently holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Whether the worker thread is running.
    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Number of byte chunks waiting to be written.
    pub fn pending_chunks(&self) -> usize {
        self.shared.pending.lock().len()
    }

    fn ensure_started(&self) {
        let mut slot = self.thread.lock();
        if self.is_stopped() {
            return;
        }
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }
        let (wake_tx, wake_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("agentlog-io".into())
            .spawn(move || {
                IoLoop::new(shared).run(&wake_rx);
                let _ = done_tx.send(());
            });
        match spawned {
            Ok(handle) => {
                *slot = Some(WorkerThread {
                    handle,
                    wake_tx,
                    done_rx,
                });
            }
            Err(err) => warn!("AgentHandler failed to start I/O thread: {err}"),
        }
    }

    /// Stop the worker after one final read and write pass.
    ///
    /// Waits at most `shutdown_timeout` for the thread to finish; a thread
    /// stuck in a slow connect is detached rather than joined.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(worker) = self.thread.lock().take() else {
            return;
        };
        if let Err(TrySendError::Disconnected(())) = worker.wake_tx.try_send(()) {
            debug!("AgentHandler I/O thread already exited");
        }
        match worker.done_rx.recv_timeout(self.shared.config.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    warn!("AgentHandler: I/O thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "AgentHandler: I/O thread did not stop within {:?}; detaching it",
                    self.shared.config.shutdown_timeout
                );
            }
        }
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for IoWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoWorker")
            .field("host", &self.shared.config.host)
            .field("port", &self.shared.config.port)
            .field("stopped", &self.is_stopped())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// State owned by the worker thread.
struct IoLoop {
    shared: Arc<Shared>,
    connection: Option<Connection>,
    read_buf: VecDeque<Vec<u8>>,
    scratch: Vec<u8>,
    connect_warner: RateLimitedWarner,
}

impl IoLoop {
    fn new(shared: Arc<Shared>) -> Self {
        let scratch = vec![0u8; shared.config.max_read_size.max(ACK_FRAME_SIZE)];
        Self {
            shared,
            connection: None,
            read_buf: VecDeque::new(),
            scratch,
            connect_warner: RateLimitedWarner::new(DEFAULT_WARN_INTERVAL),
        }
    }

    fn run(mut self, wake_rx: &Receiver<()>) {
        self.ensure_connected();
        while !self.shared.stopped.load(Ordering::Acquire) {
            let started = Instant::now();
            self.flush();
            let remaining = self
                .shared
                .config
                .io_timeout
                .saturating_sub(started.elapsed())
                .max(MIN_TICK);
            if let Err(RecvTimeoutError::Disconnected) = wake_rx.recv_timeout(remaining) {
                thread::sleep(remaining);
            }
        }
        self.flush();
        self.disconnect();
    }

    fn flush(&mut self) {
        self.read();
        self.process_acks();
        self.write();
    }

    fn ensure_connected(&mut self) {
        if self.connection.is_some() {
            return;
        }
        match Connection::open(&self.shared.config) {
            Ok(connection) => {
                info!(
                    "AgentHandler connected to collector at {}",
                    connection.peer()
                );
                self.connection = Some(connection);
                self.shared.connected.store(true, Ordering::Release);
                let backlog = self.shared.hooks.connected();
                if !backlog.is_empty() {
                    info!(
                        "AgentHandler flushing {} backlog frames after connecting",
                        backlog.len()
                    );
                    self.shared.pending.lock().extend(backlog);
                }
            }
            Err(err) => {
                self.shared.count(TransportEvent::ConnFails);
                self.connect_warner.record_drop();
                let config = &self.shared.config;
                self.connect_warner.warn_if_due(|count| {
                    warn!(
                        "AgentHandler cannot reach collector {}:{}: {err} ({count} failed attempts)",
                        config.host, config.port
                    );
                });
            }
        }
    }

    fn connection_lost(&mut self, err: &io::Error) {
        warn!("AgentHandler connection to collector lost: {err}");
        self.shared.count(TransportEvent::ConnFails);
        self.disconnect();
    }

    fn disconnect(&mut self) {
        if self.connection.take().is_none() {
            return;
        }
        self.shared.connected.store(false, Ordering::Release);
        self.shared.pending.lock().clear();
        self.read_buf.clear();
        if self.shared.stopped.load(Ordering::Acquire) {
            self.shared.hooks.unwritten();
        } else {
            self.shared.hooks.disconnected();
        }
    }

    /// Drop frames queued while no connection exists.
    fn discard_pending(&mut self) {
        let discarded = {
            let mut pending = self.shared.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if discarded > 0 {
            debug!("AgentHandler discarded {discarded} frames queued while offline");
            self.shared.hooks.unwritten();
        }
    }

    fn read(&mut self) {
        self.ensure_connected();
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        let failure = loop {
            match connection.read(&mut self.scratch) {
                Ok(ReadOutcome::Data(n)) => self.read_buf.push_back(self.scratch[..n].to_vec()),
                Ok(ReadOutcome::Idle) => break None,
                Ok(ReadOutcome::Closed) => {
                    break Some(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "connection closed by collector",
                    ));
                }
                Err(err) => break Some(err),
            }
        };
        if let Some(err) = failure {
            self.connection_lost(&err);
        }
    }

    fn process_acks(&mut self) {
        while !self.read_buf.is_empty() {
            merge_prefix(&mut self.read_buf, ACK_FRAME_SIZE);
            if self.read_buf[0].len() < ACK_FRAME_SIZE {
                break;
            }
            let Some(packet) = self.read_buf.pop_front() else {
                break;
            };
            match decode_ack(&packet) {
                Ok(chunk) => {
                    if self.shared.config.log_acks {
                        debug!("collector acknowledged chunk {chunk}");
                    }
                    self.shared.hooks.acknowledged(&chunk);
                }
                Err(err) => {
                    warn!("AgentHandler received invalid ack packet {packet:?}: {err}");
                    self.shared.count(TransportEvent::InvalidAcks);
                }
            }
        }
    }

    fn write(&mut self) {
        self.ensure_connected();
        if self.connection.is_none() {
            self.discard_pending();
            return;
        }
        loop {
            let packet = {
                let mut pending = self.shared.pending.lock();
                merge_prefix(&mut pending, self.shared.config.max_write_size);
                pending.pop_front()
            };
            let Some(packet) = packet else {
                return;
            };
            let Some(connection) = self.connection.as_mut() else {
                return;
            };
            match connection.write(&packet) {
                Ok(written) if written == packet.len() => {}
                Ok(written) => {
                    self.shared
                        .pending
                        .lock()
                        .push_front(packet[written..].to_vec());
                    return;
                }
                Err(err) => {
                    self.connection_lost(&err);
                    return;
                }
            }
        }
    }
}
