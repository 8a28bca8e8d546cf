//! TCP connection to the collector.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use super::config::TransportConfig;

/// Outcome of a bounded read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were received.
    Data(usize),
    /// Nothing arrived before the timeout.
    Idle,
    /// The peer closed the connection.
    Closed,
}

/// Live socket owned by the worker thread.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    (host, port).to_socket_addrs().map(|iter| iter.collect())
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

impl Connection {
    /// Connect to the configured collector, trying each resolved address.
    pub fn open(config: &TransportConfig) -> io::Result<Self> {
        let mut last_err = None;
        for addr in resolve(&config.host, config.port)? {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    let connection = Self { stream, peer: addr };
                    connection.apply_io_timeout(config.io_timeout)?;
                    return Ok(connection);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}:{}", config.host, config.port),
            )
        }))
    }

    /// Zero means non-blocking I/O; std rejects zero socket timeouts.
    fn apply_io_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.stream.set_nodelay(true)?;
        if timeout.is_zero() {
            return self.stream.set_nonblocking(true);
        }
        self.stream.set_nonblocking(false)?;
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Read into `buf`, treating a timeout as "nothing to read".
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        match self.stream.read(buf) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(err) if is_timeout(&err) => Ok(ReadOutcome::Idle),
            Err(err) => Err(err),
        }
    }

    /// Write as much of `packet` as the socket accepts before timing out.
    ///
    /// Returns the number of bytes written; a short count means the socket
    /// was not ready and the remainder should be retried later.
    pub fn write(&mut self, packet: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < packet.len() {
            match self.stream.write(&packet[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "collector stopped accepting data",
                    ));
                }
                Ok(n) => written += n,
                Err(err) if is_timeout(&err) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn config_for(listener: &TcpListener) -> TransportConfig {
        let addr = listener.local_addr().expect("listener address");
        TransportConfig::default()
            .with_address(addr.ip().to_string(), addr.port())
            .with_io_timeout(Duration::from_millis(50))
    }

    #[test]
    fn reads_report_idle_then_closed() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let config = config_for(&listener);
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            thread::sleep(Duration::from_millis(150));
            drop(stream);
        });

        let mut conn = Connection::open(&config).expect("connect");
        let mut buf = [0u8; 16];
        assert_eq!(conn.read(&mut buf).expect("read"), ReadOutcome::Idle);
        server.join().expect("server thread");
        let mut outcome = conn.read(&mut buf).expect("read");
        while outcome == ReadOutcome::Idle {
            outcome = conn.read(&mut buf).expect("read");
        }
        assert_eq!(outcome, ReadOutcome::Closed);
    }

    #[test]
    fn writes_whole_packets() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let config = config_for(&listener);
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut received = vec![0u8; 5];
            stream.read_exact(&mut received).expect("read");
            received
        });

        let mut conn = Connection::open(&config).expect("connect");
        assert_eq!(conn.write(b"hello").expect("write"), 5);
        assert_eq!(server.join().expect("server thread"), b"hello");
    }

    #[test]
    fn refused_connection_is_an_error() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let config = config_for(&listener);
        drop(listener);
        assert!(Connection::open(&config).is_err());
    }
}
