//! Loopback collector that decodes frames and answers with acknowledgments.
//!
//! The collector accepts any number of connections, decodes each MessagePack
//! frame as it arrives, publishes it on a channel, and, while acking is
//! enabled, replies with the 30-byte `{"ack": chunk}` map a real agent sends.

use std::{
    collections::BTreeMap,
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::transport::encode_ack;

/// One frame as seen by the collector.
#[derive(Clone, Debug, Deserialize)]
pub struct ReceivedFrame {
    pub tag: String,
    pub time: i64,
    pub record: serde_json::Value,
    pub options: BTreeMap<String, String>,
}

impl ReceivedFrame {
    /// The correlation id carried in the options map.
    pub fn chunk(&self) -> &str {
        self.options.get("chunk").map(String::as_str).unwrap_or("")
    }
}

struct CollectorState {
    ack: AtomicBool,
    stop: AtomicBool,
    connections: AtomicUsize,
    streams: Mutex<Vec<TcpStream>>,
    frames_tx: Sender<ReceivedFrame>,
}

/// Collector bound to an ephemeral loopback port.
pub struct FakeCollector {
    addr: SocketAddr,
    state: Arc<CollectorState>,
    frames_rx: Receiver<ReceivedFrame>,
}

impl FakeCollector {
    /// Bind and start accepting connections.
    pub fn start(ack: bool) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let (frames_tx, frames_rx) = unbounded();
        let state = Arc::new(CollectorState {
            ack: AtomicBool::new(ack),
            stop: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            streams: Mutex::new(Vec::new()),
            frames_tx,
        });
        let accept_state = Arc::clone(&state);
        thread::spawn(move || accept_loop(&listener, &accept_state));
        Ok(Self {
            addr,
            state,
            frames_rx,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Enable or disable acknowledgments for frames received from now on.
    pub fn set_ack(&self, ack: bool) {
        self.state.ack.store(ack, Ordering::SeqCst);
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for the next frame.
    pub fn recv(&self, timeout: Duration) -> Option<ReceivedFrame> {
        self.frames_rx.recv_timeout(timeout).ok()
    }

    /// Collect frames until none arrives for `quiet`.
    pub fn drain(&self, quiet: Duration) -> Vec<ReceivedFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.recv(quiet) {
            frames.push(frame);
        }
        frames
    }

    /// Close every open connection.
    pub fn drop_connections(&self) {
        for stream in self.state.streams.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for FakeCollector {
    fn drop(&mut self) {
        self.state.stop.store(true, Ordering::SeqCst);
        self.drop_connections();
    }
}

fn accept_loop(listener: &TcpListener, state: &Arc<CollectorState>) {
    while !state.stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let Ok(registered) = stream.try_clone() else {
                    continue;
                };
                state.streams.lock().push(registered);
                state.connections.fetch_add(1, Ordering::SeqCst);
                let conn_state = Arc::clone(state);
                thread::spawn(move || serve(stream, &conn_state));
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => break,
        }
    }
}

fn serve(stream: TcpStream, state: &CollectorState) {
    let Ok(mut writer) = stream.try_clone() else {
        return;
    };
    let mut de = rmp_serde::Deserializer::new(stream);
    while let Ok(frame) = ReceivedFrame::deserialize(&mut de) {
        if state.ack.load(Ordering::SeqCst) {
            let Ok(ack) = encode_ack(frame.chunk()) else {
                break;
            };
            if writer.write_all(&ack).is_err() {
                break;
            }
        }
        if state.frames_tx.send(frame).is_err() {
            break;
        }
    }
}
