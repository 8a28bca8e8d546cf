//! Reliable delivery of frames to a log-collection agent.
//!
//! Frames are MessagePack arrays correlated with the collector's
//! acknowledgments by a per-frame chunk id. The [`BacklogBuffer`] keeps every
//! frame until it is acknowledged and hands unacknowledged frames out again
//! after a cool-off period; the [`IoWorker`] owns the TCP socket on a
//! background thread, writes whatever it is given, reconnects after failures
//! and replays the backlog once a connection is re-established.

mod buffer;
mod config;
mod connection;
mod frame;
mod prefix;
mod worker;

#[cfg(test)]
mod tests;

pub use buffer::{BacklogBuffer, BacklogStats, DEFAULT_MAX_BACKUP, DEFAULT_WAIT_TIME};
pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HOST, DEFAULT_IO_TIMEOUT, DEFAULT_MAX_READ_SIZE,
    DEFAULT_MAX_WRITE_SIZE, DEFAULT_PORT, DEFAULT_SHUTDOWN_TIMEOUT, TransportConfig,
};
pub use connection::{Connection, ReadOutcome};
pub use frame::{
    ACK_FRAME_SIZE, Frame, FrameError, decode_ack, encode_ack, encode_frame, new_chunk_id,
};
pub use prefix::merge_prefix;
pub use worker::{IoWorker, WorkerHooks};
