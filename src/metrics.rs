//! Counter port used to observe the transport.
//!
//! The transport never owns a metrics registry. Callers inject an
//! implementation of [`MetricsSink`]; [`NoopMetrics`] is used when none is
//! supplied and [`CountingMetrics`] keeps in-process totals.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Events counted by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportEvent {
    /// A frame was refused because the backlog was full.
    LogDrops,
    /// An unacknowledged frame became eligible for retransmission.
    Resends,
    /// Connecting, reading or writing failed, or the peer closed.
    ConnFails,
    /// An acknowledgment frame could not be decoded.
    InvalidAcks,
    /// Appending to the disk journal failed.
    JournalFailures,
    /// Emitting a record failed for any other reason.
    HandlerErrors,
}

impl TransportEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportEvent::LogDrops => "log_drops",
            TransportEvent::Resends => "resends",
            TransportEvent::ConnFails => "conn_fails",
            TransportEvent::InvalidAcks => "invalid_acks",
            TransportEvent::JournalFailures => "journal_failures",
            TransportEvent::HandlerErrors => "handler_errors",
        }
    }
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label pairs attached to a counter increment, e.g. `[("host", "web")]`.
pub type Labels<'a> = &'a [(&'static str, &'a str)];

/// Write-only counter interface.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, event: TransportEvent, labels: Labels<'_>);
}

/// Shared handle to a metrics sink.
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Discards every increment.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _event: TransportEvent, _labels: Labels<'_>) {}
}

/// Keeps per-event totals in memory, ignoring labels.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    counts: Mutex<BTreeMap<TransportEvent, u64>>,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current total for `event`.
    pub fn count(&self, event: TransportEvent) -> u64 {
        self.counts.lock().get(&event).copied().unwrap_or(0)
    }

    /// Snapshot of every non-zero total.
    pub fn snapshot(&self) -> BTreeMap<TransportEvent, u64> {
        self.counts.lock().clone()
    }
}

impl MetricsSink for CountingMetrics {
    fn increment(&self, event: TransportEvent, _labels: Labels<'_>) {
        *self.counts.lock().entry(event).or_insert(0) += 1;
    }
}
