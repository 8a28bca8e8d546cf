//! Worker tests against a loopback collector.

use std::{
    io::Write,
    net::TcpListener,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use rstest::{fixture, rstest};

use super::*;
use crate::{
    flatten::FlatRecord,
    metrics::{CountingMetrics, TransportEvent},
    test_utils::{FakeCollector, closed_port, wait_for},
    value::Value,
};

const PATIENCE: Duration = Duration::from_secs(5);

fn config_for(host: String, port: u16) -> TransportConfig {
    TransportConfig {
        connect_timeout: Duration::from_millis(500),
        shutdown_timeout: Duration::from_secs(2),
        ..TransportConfig::default()
    }
    .with_address(host, port)
    .with_io_timeout(Duration::from_millis(20))
}

fn unreachable_config() -> TransportConfig {
    config_for("127.0.0.1".into(), closed_port())
}

fn record(message: &str) -> FlatRecord {
    let mut record = FlatRecord::new();
    record.insert("message".into(), Value::from(message));
    record
}

struct Harness {
    buffer: Arc<BacklogBuffer>,
    worker: IoWorker,
    metrics: Arc<CountingMetrics>,
}

impl Harness {
    fn new(config: TransportConfig) -> Self {
        let metrics = Arc::new(CountingMetrics::new());
        let buffer = Arc::new(
            BacklogBuffer::new(DEFAULT_MAX_BACKUP, DEFAULT_WAIT_TIME)
                .with_metrics(metrics.clone(), "collector"),
        );
        let worker = IoWorker::with_metrics(
            config,
            buffer.clone(),
            metrics.clone(),
            "collector".into(),
        );
        Self {
            buffer,
            worker,
            metrics,
        }
    }

    fn emit(&self, message: &str) -> String {
        let frame = Frame::encode("log.test.events", 1_700_000_000, &record(message))
            .expect("encode frame");
        self.buffer.add(frame.chunk.clone(), frame.bytes, false);
        for bytes in self.buffer.get_logs(DEFAULT_MAX_BACKUP, true) {
            self.worker.send(bytes);
        }
        frame.chunk
    }
}

#[fixture]
fn acking_collector() -> FakeCollector {
    FakeCollector::start(true).expect("start collector")
}

#[fixture]
fn silent_collector() -> FakeCollector {
    FakeCollector::start(false).expect("start collector")
}

#[rstest]
fn delivers_frames_and_clears_acked_entries(acking_collector: FakeCollector) {
    let harness = Harness::new(config_for(acking_collector.host(), acking_collector.port()));
    let chunks: Vec<String> = ["one", "two", "three"]
        .iter()
        .map(|m| harness.emit(m))
        .collect();

    let mut received = Vec::new();
    while received.len() < chunks.len() {
        let frame = acking_collector.recv(PATIENCE).expect("frame delivered");
        received.push(frame);
    }
    let seen: Vec<&str> = received.iter().map(|f| f.chunk()).collect();
    assert_eq!(seen, chunks.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(received[0].tag, "log.test.events");
    assert_eq!(received[0].time, 1_700_000_000);
    assert_eq!(received[1].record["message"], "two");

    assert!(wait_for(PATIENCE, || harness.buffer.stats().live == 0));
    assert!(harness.worker.is_connected());
}

#[rstest]
fn unacknowledged_frames_stay_in_cooloff(silent_collector: FakeCollector) {
    let harness = Harness::new(config_for(silent_collector.host(), silent_collector.port()));
    harness.emit("pending");
    assert!(silent_collector.recv(PATIENCE).is_some());
    let stats = harness.buffer.stats();
    assert_eq!(stats.cooloff, 1);
    assert_eq!(stats.live, 1);
}

#[rstest]
fn reconnect_replays_unacknowledged_frames(silent_collector: FakeCollector) {
    let harness = Harness::new(config_for(silent_collector.host(), silent_collector.port()));
    let chunk = harness.emit("replay me");
    let first = silent_collector.recv(PATIENCE).expect("first delivery");
    assert_eq!(first.chunk(), chunk);

    silent_collector.set_ack(true);
    silent_collector.drop_connections();

    let replayed = silent_collector.recv(PATIENCE).expect("replayed frame");
    assert_eq!(replayed.chunk(), chunk);
    assert!(silent_collector.connections() >= 2);
    assert!(wait_for(PATIENCE, || harness.buffer.stats().live == 0));
    assert!(harness.metrics.count(TransportEvent::Resends) >= 1);
}

#[test]
fn invalid_acks_are_counted_and_skipped() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    let addr = listener.local_addr().expect("address");
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        stream
            .write_all(&[0xc1; ACK_FRAME_SIZE])
            .expect("write garbage");
        thread::sleep(Duration::from_millis(300));
    });

    let harness = Harness::new(config_for(addr.ip().to_string(), addr.port()));
    harness.emit("hello");
    assert!(wait_for(PATIENCE, || {
        harness.metrics.count(TransportEvent::InvalidAcks) == 1
    }));
    assert_eq!(harness.buffer.stats().live, 1);
    server.join().expect("server thread");
}

#[test]
fn unreachable_collector_counts_failures_and_keeps_backlog() {
    let harness = Harness::new(unreachable_config());
    harness.emit("nobody listens");
    assert!(wait_for(PATIENCE, || {
        harness.metrics.count(TransportEvent::ConnFails) >= 1
    }));
    assert!(!harness.worker.is_connected());
    assert_eq!(harness.buffer.stats().live, 1);
}

#[test]
fn stop_is_bounded_when_collector_is_unreachable() {
    let harness = Harness::new(unreachable_config());
    harness.emit("lost");
    let started = Instant::now();
    harness.worker.stop();
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(harness.worker.is_stopped());
}

#[rstest]
fn send_after_stop_is_ignored(acking_collector: FakeCollector) {
    let harness = Harness::new(config_for(acking_collector.host(), acking_collector.port()));
    harness.worker.stop();
    harness.worker.stop();
    harness.emit("too late");
    assert!(!harness.worker.is_running());
    assert_eq!(harness.worker.pending_chunks(), 0);
    assert!(acking_collector.recv(Duration::from_millis(200)).is_none());
}

#[test]
fn pending_writes_stay_bounded_while_collector_is_unreachable() {
    let buffer = Arc::new(BacklogBuffer::new(2, Duration::ZERO));
    let worker = IoWorker::new(unreachable_config(), buffer.clone());
    for i in 0..50 {
        let frame = Frame::encode("log.test.events", 1_700_000_000, &record(&format!("m{i}")))
            .expect("encode frame");
        buffer.add(frame.chunk, frame.bytes, false);
        for bytes in buffer.get_logs(10, true) {
            worker.send(bytes);
        }
        assert!(worker.pending_chunks() <= buffer.max_backup());
        assert!(wait_for(PATIENCE, || worker.pending_chunks() == 0));
    }
    let stats = buffer.stats();
    assert_eq!((stats.live, stats.cooloff), (2, 0));
    assert_eq!(buffer.dropped(), 48);
}

#[rstest]
fn shutdown_does_not_count_resends(silent_collector: FakeCollector) {
    let harness = Harness::new(config_for(silent_collector.host(), silent_collector.port()));
    harness.emit("unacked at shutdown");
    assert!(silent_collector.recv(PATIENCE).is_some());
    harness.worker.stop();
    assert_eq!(harness.metrics.count(TransportEvent::Resends), 0);
    assert_eq!(harness.buffer.stats().live, 1);
}

#[rstest]
fn zero_io_timeout_still_delivers_and_stops(acking_collector: FakeCollector) {
    let config = config_for(acking_collector.host(), acking_collector.port())
        .with_io_timeout(Duration::ZERO);
    let harness = Harness::new(config);
    harness.emit("busy loop");
    assert!(acking_collector.recv(PATIENCE).is_some());
    assert!(wait_for(PATIENCE, || harness.buffer.stats().live == 0));
    let started = Instant::now();
    harness.worker.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
}
