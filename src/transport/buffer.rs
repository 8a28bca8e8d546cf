//! Bounded backlog of frames awaiting acknowledgment.
//!
//! Frames live in one of two queues: `to_send` holds frames that have not
//! been handed to the socket yet, `cooloff` holds frames that were sent and
//! are waiting for the collector to acknowledge them. Acknowledged ids are
//! recorded in `acked` and removed lazily, either when they reach the front
//! of `to_send` or by a compaction pass once `acked` grows to half of the
//! queued entries.
//!
//! A frame left in `cooloff` for longer than the wait time is moved back to
//! `to_send` and sent again; the collector may therefore see duplicates but
//! never silently loses a frame while the process is alive.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use log::warn;
use parking_lot::Mutex;

use crate::{
    metrics::{NoopMetrics, SharedMetrics, TransportEvent},
    rate_limited_warner::{DEFAULT_WARN_INTERVAL, RateLimitedWarner},
};

use super::worker::WorkerHooks;

/// Default number of unacknowledged frames kept in memory.
pub const DEFAULT_MAX_BACKUP: usize = 10_000;
/// Default minimum round trip allowed before a frame is resent.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct BacklogEntry {
    id: String,
    last_sent: Instant,
    frame: Vec<u8>,
}

#[derive(Debug, Default)]
struct BacklogState {
    to_send: VecDeque<BacklogEntry>,
    /// Ordered by `last_sent`.
    cooloff: VecDeque<BacklogEntry>,
    acked: HashSet<String>,
    /// Ids physically present in `to_send` or `cooloff` and not yet acked.
    live: HashSet<String>,
}

impl BacklogState {
    fn live_count(&self) -> usize {
        (self.to_send.len() + self.cooloff.len()).saturating_sub(self.acked.len())
    }

    fn compact(&mut self) {
        let acked = std::mem::take(&mut self.acked);
        self.to_send.retain(|entry| !acked.contains(&entry.id));
        self.cooloff.retain(|entry| !acked.contains(&entry.id));
    }
}

/// Point-in-time view of the backlog sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BacklogStats {
    pub to_send: usize,
    pub cooloff: usize,
    pub acked: usize,
    /// `to_send + cooloff - acked`.
    pub live: usize,
}

/// Thread-safe bounded store of unacknowledged frames.
pub struct BacklogBuffer {
    state: Mutex<BacklogState>,
    max_backup: usize,
    wait_time: Duration,
    host: String,
    metrics: SharedMetrics,
    warner: RateLimitedWarner,
}

impl BacklogBuffer {
    /// Create a buffer holding at most `max_backup` live frames and resending
    /// unacknowledged frames after `wait_time`.
    pub fn new(max_backup: usize, wait_time: Duration) -> Self {
        Self {
            state: Mutex::new(BacklogState::default()),
            max_backup,
            wait_time,
            host: String::new(),
            metrics: std::sync::Arc::new(NoopMetrics),
            warner: RateLimitedWarner::new(DEFAULT_WARN_INTERVAL),
        }
    }

    /// Report counters to `metrics`, labelled with `host`.
    pub fn with_metrics(mut self, metrics: SharedMetrics, host: impl Into<String>) -> Self {
        self.metrics = metrics;
        self.host = host.into();
        self
    }

    /// Override how often overflow warnings are logged.
    pub fn with_warn_interval(mut self, interval: Duration) -> Self {
        self.warner = RateLimitedWarner::new(interval);
        self
    }

    pub fn max_backup(&self) -> usize {
        self.max_backup
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// Number of frames dropped because the backlog was full.
    pub fn dropped(&self) -> u64 {
        self.warner.total_dropped()
    }

    pub fn stats(&self) -> BacklogStats {
        let state = self.state.lock();
        BacklogStats {
            to_send: state.to_send.len(),
            cooloff: state.cooloff.len(),
            acked: state.acked.len(),
            live: state.live_count(),
        }
    }

    fn count(&self, event: TransportEvent, times: usize) {
        let labels = [("host", self.host.as_str())];
        for _ in 0..times {
            self.metrics.increment(event, &labels);
        }
    }

    /// Queue `frame` under correlation id `id`.
    ///
    /// When the backlog already holds `max_backup` live frames the new frame
    /// is dropped.
    pub fn add(&self, id: impl Into<String>, frame: Vec<u8>, sent: bool) {
        self.add_at(id, frame, sent, Instant::now());
    }

    /// [`add`](Self::add) with an explicit send time for `sent` frames.
    pub fn add_at(&self, id: impl Into<String>, frame: Vec<u8>, sent: bool, now: Instant) {
        let id = id.into();
        {
            let mut state = self.state.lock();
            if state.live_count() < self.max_backup {
                state.live.insert(id.clone());
                let entry = BacklogEntry {
                    id,
                    last_sent: now,
                    frame,
                };
                if sent {
                    state.cooloff.push_back(entry);
                } else {
                    state.to_send.push_back(entry);
                }
                return;
            }
        }

        self.warner.record_drop();
        self.warner.warn_if_due(|count| {
            warn!(
                "AgentHandler backlog full ({} frames); dropped {count} records",
                self.max_backup
            );
        });
        self.count(TransportEvent::LogDrops, 1);
    }

    /// Mark `id` as acknowledged by the collector.
    ///
    /// Unknown and already acknowledged ids are ignored.
    pub fn ack(&self, id: &str) {
        let mut state = self.state.lock();
        if !state.live.remove(id) {
            return;
        }
        state.acked.insert(id.to_owned());
        if state.to_send.len() + state.cooloff.len() < 2 * state.acked.len() {
            state.compact();
        }
    }

    /// Take up to `n` frames ready to be written.
    ///
    /// Frames whose cool-off expired are first moved to the back of
    /// `to_send`. With `send` the returned frames move to `cooloff`;
    /// otherwise they stay queued and the call only peeks.
    pub fn get_logs(&self, n: usize, send: bool) -> VecDeque<Vec<u8>> {
        self.get_logs_at(n, send, Instant::now())
    }

    /// [`get_logs`](Self::get_logs) evaluated at `now`.
    pub fn get_logs_at(&self, n: usize, send: bool, now: Instant) -> VecDeque<Vec<u8>> {
        let mut logs = VecDeque::new();
        let resent;
        {
            let mut state = self.state.lock();
            resent = self.expire_cooloff(&mut state, now);

            let mut taken = Vec::new();
            while logs.len() < n {
                let Some(mut entry) = state.to_send.pop_front() else {
                    break;
                };
                if state.acked.remove(&entry.id) {
                    continue;
                }
                logs.push_back(entry.frame.clone());
                if send {
                    entry.last_sent = now;
                    state.cooloff.push_back(entry);
                } else {
                    taken.push(entry);
                }
            }
            for entry in taken.into_iter().rev() {
                state.to_send.push_front(entry);
            }
        }
        self.count(TransportEvent::Resends, resent);
        logs
    }

    fn expire_cooloff(&self, state: &mut BacklogState, now: Instant) -> usize {
        let mut moved = 0;
        while let Some(entry) = state.cooloff.front() {
            if now.saturating_duration_since(entry.last_sent) < self.wait_time {
                break;
            }
            if let Some(entry) = state.cooloff.pop_front() {
                state.to_send.push_back(entry);
                moved += 1;
            }
        }
        moved
    }

    /// Move every frame awaiting acknowledgment back to the front of
    /// `to_send`, ahead of never-sent frames.
    ///
    /// Used when the connection drops: bytes on the wire are assumed lost.
    pub fn requeue_unacked(&self) -> usize {
        let requeued = self.reclaim_cooloff();
        self.count(TransportEvent::Resends, requeued);
        requeued
    }

    /// Move every frame awaiting acknowledgment back to the front of
    /// `to_send` without counting resends.
    ///
    /// Used when handed-over frames never reached a socket.
    pub fn reclaim_cooloff(&self) -> usize {
        let mut state = self.state.lock();
        let cooloff = std::mem::take(&mut state.cooloff);
        let reclaimed = cooloff
            .iter()
            .filter(|entry| !state.acked.contains(&entry.id))
            .count();
        for entry in cooloff.into_iter().rev() {
            state.to_send.push_front(entry);
        }
        reclaimed
    }
}

impl WorkerHooks for BacklogBuffer {
    fn acknowledged(&self, chunk: &str) {
        self.ack(chunk);
    }

    fn connected(&self) -> VecDeque<Vec<u8>> {
        self.get_logs(self.max_backup, true)
    }

    fn disconnected(&self) {
        self.requeue_unacked();
    }

    fn unwritten(&self) {
        self.reclaim_cooloff();
    }
}

impl std::fmt::Debug for BacklogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacklogBuffer")
            .field("max_backup", &self.max_backup)
            .field("wait_time", &self.wait_time)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CountingMetrics;
    use proptest::prelude::*;
    use rstest::{fixture, rstest};
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(30);

    #[fixture]
    fn metrics() -> Arc<CountingMetrics> {
        Arc::new(CountingMetrics::new())
    }

    fn buffer(max: usize, metrics: &Arc<CountingMetrics>) -> BacklogBuffer {
        BacklogBuffer::new(max, WAIT).with_metrics(metrics.clone(), "test-host")
    }

    fn frame(id: &str) -> Vec<u8> {
        id.as_bytes().to_vec()
    }

    fn frames(logs: &VecDeque<Vec<u8>>) -> Vec<String> {
        logs.iter()
            .map(|f| String::from_utf8(f.clone()).expect("utf8 frame"))
            .collect()
    }

    #[rstest]
    fn drops_when_full(metrics: Arc<CountingMetrics>) {
        let buf = buffer(2, &metrics);
        buf.add("a", frame("a"), false);
        buf.add("b", frame("b"), true);
        buf.add("c", frame("c"), false);
        buf.add("d", frame("d"), false);

        assert_eq!(buf.stats().live, 2);
        assert_eq!(buf.dropped(), 2);
        assert_eq!(metrics.count(TransportEvent::LogDrops), 2);
    }

    #[rstest]
    fn acked_entries_free_capacity(metrics: Arc<CountingMetrics>) {
        let buf = buffer(2, &metrics);
        buf.add("a", frame("a"), false);
        buf.add("b", frame("b"), false);
        buf.ack("a");
        buf.add("c", frame("c"), false);
        assert_eq!(buf.dropped(), 0);
        assert_eq!(buf.stats().live, 2);
    }

    #[rstest]
    fn get_logs_without_send_only_peeks(metrics: Arc<CountingMetrics>) {
        let buf = buffer(10, &metrics);
        for id in ["a", "b", "c"] {
            buf.add(id, frame(id), false);
        }
        assert_eq!(frames(&buf.get_logs(2, false)), ["a", "b"]);
        assert_eq!(frames(&buf.get_logs(5, false)), ["a", "b", "c"]);
        assert_eq!(buf.stats().to_send, 3);
        assert_eq!(buf.stats().cooloff, 0);
    }

    #[rstest]
    fn get_logs_with_send_moves_to_cooloff(metrics: Arc<CountingMetrics>) {
        let buf = buffer(10, &metrics);
        for id in ["a", "b", "c"] {
            buf.add(id, frame(id), false);
        }
        assert_eq!(frames(&buf.get_logs(2, true)), ["a", "b"]);
        let stats = buf.stats();
        assert_eq!((stats.to_send, stats.cooloff), (1, 2));
        assert_eq!(frames(&buf.get_logs(5, true)), ["c"]);
        assert!(buf.get_logs(5, true).is_empty());
    }

    #[rstest]
    fn skips_acknowledged_entries(metrics: Arc<CountingMetrics>) {
        let buf = buffer(10, &metrics);
        for id in ["a", "b", "c", "d", "e"] {
            buf.add(id, frame(id), false);
        }
        buf.ack("b");
        assert_eq!(frames(&buf.get_logs(2, true)), ["a", "c"]);
        assert_eq!(buf.stats().acked, 0);
    }

    #[rstest]
    fn unacked_entries_are_resent_after_wait_time(metrics: Arc<CountingMetrics>) {
        let buf = buffer(10, &metrics);
        let start = Instant::now();
        buf.add("a", frame("a"), false);
        buf.add("b", frame("b"), false);
        assert_eq!(buf.get_logs_at(10, true, start).len(), 2);
        buf.ack("b");

        let early = start + WAIT - Duration::from_secs(1);
        assert!(buf.get_logs_at(10, true, early).is_empty());

        let late = start + WAIT;
        assert_eq!(frames(&buf.get_logs_at(10, true, late)), ["a"]);
        assert_eq!(metrics.count(TransportEvent::Resends), 2);
    }

    #[rstest]
    fn ack_is_idempotent(metrics: Arc<CountingMetrics>) {
        let buf = buffer(10, &metrics);
        for id in ["a", "b", "c", "d"] {
            buf.add(id, frame(id), false);
        }
        buf.ack("a");
        let once = buf.stats();
        buf.ack("a");
        assert_eq!(buf.stats(), once);
        assert_eq!(frames(&buf.get_logs(10, false)), ["b", "c", "d"]);
    }

    #[rstest]
    fn unrelated_ack_leaves_entry_pending(metrics: Arc<CountingMetrics>) {
        let buf = buffer(10, &metrics);
        buf.add("x", frame("x"), true);
        buf.ack("y");
        let stats = buf.stats();
        assert_eq!((stats.cooloff, stats.acked, stats.live), (1, 0, 1));
    }

    #[rstest]
    fn compaction_runs_when_acked_dominates(metrics: Arc<CountingMetrics>) {
        let buf = buffer(10, &metrics);
        for id in ["a", "b", "c"] {
            buf.add(id, frame(id), true);
        }
        buf.ack("a");
        assert_eq!(buf.stats().acked, 1);
        buf.ack("b");
        let stats = buf.stats();
        assert_eq!((stats.cooloff, stats.acked, stats.live), (1, 0, 1));
    }

    #[rstest]
    fn requeue_moves_cooloff_ahead_of_unsent(metrics: Arc<CountingMetrics>) {
        let buf = buffer(10, &metrics);
        for id in ["a", "b", "c"] {
            buf.add(id, frame(id), false);
        }
        buf.get_logs(2, true);
        buf.add("d", frame("d"), false);

        assert_eq!(buf.requeue_unacked(), 2);
        assert_eq!(metrics.count(TransportEvent::Resends), 2);
        assert_eq!(frames(&buf.connected()), ["a", "b", "c", "d"]);
    }

    #[rstest]
    fn reclaiming_unwritten_frames_counts_no_resends(metrics: Arc<CountingMetrics>) {
        let buf = buffer(10, &metrics);
        for id in ["a", "b", "c"] {
            buf.add(id, frame(id), false);
        }
        buf.get_logs(2, true);
        buf.ack("a");

        assert_eq!(buf.reclaim_cooloff(), 1);
        assert_eq!(metrics.count(TransportEvent::Resends), 0);
        let stats = buf.stats();
        assert_eq!((stats.to_send, stats.cooloff), (3, 0));
        assert_eq!(frames(&buf.get_logs(10, false)), ["b", "c"]);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Add(bool),
        Ack(usize),
        Get(usize, bool),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<bool>().prop_map(Op::Add),
            (0usize..64).prop_map(Op::Ack),
            ((0usize..8), any::<bool>()).prop_map(|(n, s)| Op::Get(n, s)),
        ]
    }

    proptest! {
        #[test]
        fn live_count_never_exceeds_max(max in 1usize..16, ops in proptest::collection::vec(op(), 0..128)) {
            let buf = BacklogBuffer::new(max, Duration::ZERO);
            let mut next = 0usize;
            let mut last_dropped = 0;
            for op in ops {
                match op {
                    Op::Add(sent) => {
                        let full = buf.stats().live >= max;
                        buf.add(next.to_string(), vec![0], sent);
                        next += 1;
                        if full {
                            prop_assert!(buf.dropped() > last_dropped);
                        }
                        last_dropped = buf.dropped();
                    }
                    Op::Ack(id) => buf.ack(&id.to_string()),
                    Op::Get(n, send) => {
                        prop_assert!(buf.get_logs(n, send).len() <= n);
                    }
                }
                prop_assert!(buf.stats().live <= max);
            }
        }
    }
}
