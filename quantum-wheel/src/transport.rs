//! Byte transports for the Quantum wheel link.
//!
//! The wheel is reachable either through a USB CDC serial port (`/dev/ttyACM0`
//! by default) or through a serial-over-TCP bridge. Both expose the same
//! contract to the protocol engine: write a whole frame, then read bytes until
//! a terminator arrives or the read times out.
//!
//! The engine never retries at this layer. A single failed write or read
//! fails the whole enclosing operation.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use thiserror::Error;
use tracing::debug;

use crate::config::ConnectionConfig;

/// Serial port timeout used for individual byte reads.
///
/// Kept short so a line read can re-check its own deadline frequently.
const SERIAL_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Errors raised by a [`Transport`].
#[derive(Error, Debug)]
pub enum TransportError {
    /// The link could not be opened.
    #[error("Failed to open {endpoint}: {reason}")]
    Open { endpoint: String, reason: String },

    /// Writing a frame failed.
    #[error("Write failed: {0}")]
    Write(std::io::Error),

    /// No terminator arrived before the deadline.
    #[error("Read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// The underlying read failed or the peer closed the link.
    #[error("Read failed: {0}")]
    ReadFailed(std::io::Error),
}

/// Byte-level link to the wheel.
///
/// Implementations own the connection exclusively; callers serialize access
/// by holding `&mut self` for the duration of an exchange.
pub trait Transport {
    /// Write every byte of `bytes`, returning the number written.
    fn write_all(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Read until `terminator` (inclusive), `max_len` bytes, or `timeout`.
    ///
    /// Returning fewer than `max_len` bytes without the terminator never
    /// happens: that case is a [`TransportError::ReadTimeout`].
    fn read_until(
        &mut self,
        terminator: u8,
        timeout: Duration,
        max_len: usize,
    ) -> Result<Vec<u8>, TransportError>;

    /// Discard any input already buffered on the link.
    fn clear_input(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Human-readable name of the remote endpoint, for diagnostics.
    fn endpoint(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        (**self).write_all(bytes)
    }

    fn read_until(
        &mut self,
        terminator: u8,
        timeout: Duration,
        max_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).read_until(terminator, timeout, max_len)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        (**self).clear_input()
    }

    fn endpoint(&self) -> String {
        (**self).endpoint()
    }
}

/// Read single bytes from `reader` until a terminator, bound, or deadline.
///
/// `before_read` is given the remaining time before each read so socket
/// transports can shrink their read timeout as the deadline approaches.
fn read_bytes_until<R, F>(
    reader: &mut R,
    terminator: u8,
    timeout: Duration,
    max_len: usize,
    mut before_read: F,
) -> Result<Vec<u8>, TransportError>
where
    R: Read + ?Sized,
    F: FnMut(&mut R, Duration) -> std::io::Result<()>,
{
    let start = Instant::now();
    let mut buf = [0u8; 1];
    let mut bytes = Vec::new();

    loop {
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(TransportError::ReadTimeout(timeout));
        }
        before_read(reader, timeout - elapsed).map_err(TransportError::ReadFailed)?;

        match reader.read(&mut buf) {
            Ok(0) => {
                return Err(TransportError::ReadFailed(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "link closed by peer",
                )))
            }
            Ok(_) => {
                bytes.push(buf[0]);
                if buf[0] == terminator || bytes.len() >= max_len {
                    return Ok(bytes);
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                continue;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::ReadFailed(e)),
        }
    }
}

/// Wheel attached through a local serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`, 8N1, no flow control.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(SERIAL_POLL_TIMEOUT)
            .open()
            .map_err(|e| TransportError::Open {
                endpoint: path.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Opened serial port {} at {} baud", path, baud_rate);

        Ok(Self {
            port,
            name: path.to_string(),
        })
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        self.port.write_all(bytes).map_err(TransportError::Write)?;
        self.port.flush().map_err(TransportError::Write)?;
        Ok(bytes.len())
    }

    fn read_until(
        &mut self,
        terminator: u8,
        timeout: Duration,
        max_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        read_bytes_until(&mut self.port, terminator, timeout, max_len, |_, _| Ok(()))
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(|e| TransportError::ReadFailed(e.into()))
    }

    fn endpoint(&self) -> String {
        self.name.clone()
    }
}

/// Wheel attached through a serial-over-TCP bridge.
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
}

impl TcpTransport {
    /// Connect to the bridge at `addr`.
    pub fn connect<A: ToSocketAddrs + std::fmt::Display>(addr: A) -> Result<Self, TransportError> {
        let peer = addr.to_string();
        let stream = TcpStream::connect(&addr).map_err(|e| TransportError::Open {
            endpoint: peer.clone(),
            reason: e.to_string(),
        })?;
        stream.set_nodelay(true).map_err(TransportError::Write)?;

        debug!("Connected to wheel bridge at {}", peer);

        Ok(Self { stream, peer })
    }
}

impl Transport for TcpTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        self.stream.write_all(bytes).map_err(TransportError::Write)?;
        self.stream.flush().map_err(TransportError::Write)?;
        Ok(bytes.len())
    }

    fn read_until(
        &mut self,
        terminator: u8,
        timeout: Duration,
        max_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        read_bytes_until(
            &mut self.stream,
            terminator,
            timeout,
            max_len,
            |stream, remaining| stream.set_read_timeout(Some(remaining.max(Duration::from_millis(1)))),
        )
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.stream
            .set_nonblocking(true)
            .map_err(TransportError::ReadFailed)?;

        let mut scratch = [0u8; 256];
        let drained = loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(TransportError::ReadFailed(e)),
            }
        };

        self.stream
            .set_nonblocking(false)
            .map_err(TransportError::ReadFailed)?;
        drained
    }

    fn endpoint(&self) -> String {
        self.peer.clone()
    }
}

/// Open the transport described by `connection`.
pub fn open_transport(connection: &ConnectionConfig) -> Result<Box<dyn Transport>, TransportError> {
    match connection {
        ConnectionConfig::Serial { port, baud_rate } => {
            Ok(Box::new(SerialTransport::open(port, *baud_rate)?))
        }
        ConnectionConfig::Tcp { address } => Ok(Box::new(TcpTransport::connect(address.as_str())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn no_op<R: ?Sized>(_: &mut R, _: Duration) -> std::io::Result<()> {
        Ok(())
    }

    #[test]
    fn test_read_stops_at_terminator() {
        let mut reader = Cursor::new(b"P3\r\nP4\r\n".to_vec());
        let line = read_bytes_until(&mut reader, b'\n', Duration::from_secs(1), 255, no_op).unwrap();
        assert_eq!(line, b"P3\r\n");

        let line = read_bytes_until(&mut reader, b'\n', Duration::from_secs(1), 255, no_op).unwrap();
        assert_eq!(line, b"P4\r\n");
    }

    #[test]
    fn test_read_stops_at_max_len() {
        let mut reader = Cursor::new(vec![b'x'; 600]);
        let line = read_bytes_until(&mut reader, b'\n', Duration::from_secs(1), 255, no_op).unwrap();
        assert_eq!(line.len(), 255);
        assert!(!line.contains(&b'\n'));
    }

    #[test]
    fn test_read_reports_closed_link() {
        let mut reader = Cursor::new(b"SN12".to_vec());
        let result = read_bytes_until(&mut reader, b'\n', Duration::from_secs(1), 255, no_op);
        assert!(matches!(result, Err(TransportError::ReadFailed(_))));
    }

    #[test]
    fn test_tcp_round_trip() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 4];
            socket.read_exact(&mut request).unwrap();
            assert_eq!(&request, b"SN\r\n");
            socket.write_all(b"SN+QFW01\r\n").unwrap();
        });

        let mut transport = TcpTransport::connect(addr).unwrap();
        assert_eq!(transport.write_all(b"SN\r\n").unwrap(), 4);
        let reply = transport
            .read_until(b'\n', Duration::from_secs(2), 255)
            .unwrap();
        assert_eq!(reply, b"SN+QFW01\r\n");

        server.join().unwrap();
    }

    #[test]
    fn test_tcp_read_times_out() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_millis(300));
            drop(socket);
        });

        let mut transport = TcpTransport::connect(addr).unwrap();
        let result = transport.read_until(b'\n', Duration::from_millis(100), 255);
        assert!(matches!(result, Err(TransportError::ReadTimeout(_))));

        server.join().unwrap();
    }
}
