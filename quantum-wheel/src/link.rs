//! Request/response pipeline over a [`Transport`].
//!
//! [`Link`] frames [`Command`]s onto the wire and reads back single reply
//! lines. It is the only place raw bytes are logged, rendered through
//! [`dump`] so binary garbage from the device stays readable.

use std::time::Duration;

use tracing::debug;

use crate::error::WheelResult;
use crate::protocol::{dump, Command, Reply, LINE_END, MAX_FRAME_LEN, TERMINATOR};
use crate::transport::Transport;

/// Low-level line link to a Quantum wheel.
///
/// For typed wheel control use [`QuantumWheel`](crate::QuantumWheel) instead.
///
/// # Example
///
/// ```no_run
/// use quantum_wheel::protocol::{parse_identity, Command};
/// use quantum_wheel::{Link, SerialTransport};
/// use std::time::Duration;
///
/// let transport = SerialTransport::open("/dev/ttyACM0", 9600)?;
/// let mut link = Link::new(transport, Duration::from_secs(5));
/// let reply = link.exchange(&Command::Identity)?;
/// println!("Extended: {}", parse_identity(&reply)?.extended);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Link<T: Transport> {
    transport: T,
    read_timeout: Duration,
}

impl<T: Transport> Link<T> {
    /// Wrap `transport`; every line read is bounded by `read_timeout`.
    pub fn new(transport: T, read_timeout: Duration) -> Self {
        Self {
            transport,
            read_timeout,
        }
    }

    /// Drop any bytes the device sent that nobody asked for.
    pub fn discard_input(&mut self) -> WheelResult<()> {
        self.transport.clear_input()?;
        Ok(())
    }

    /// Write one command. Does not read a reply.
    pub fn send(&mut self, command: &Command) -> WheelResult<()> {
        self.write_frame(&command.encode())
    }

    /// Read one reply line.
    pub fn read_reply(&mut self) -> WheelResult<Reply> {
        let raw = self
            .transport
            .read_until(LINE_END, self.read_timeout, MAX_FRAME_LEN)?;
        debug!("RES <{}>", dump(&raw));
        Reply::from_frame(raw)
    }

    /// Discard stale input, send `command`, and read its reply line.
    ///
    /// The reply is not checked against the command; the typed parsers in
    /// [`protocol`](crate::protocol) do that.
    pub fn exchange(&mut self, command: &Command) -> WheelResult<Reply> {
        self.discard_input()?;
        self.send(command)?;
        self.read_reply()
    }

    /// Send an arbitrary line and read one reply, for interactive use.
    pub fn exchange_raw(&mut self, line: &str) -> WheelResult<Reply> {
        let mut frame = line.trim_end_matches(['\r', '\n']).as_bytes().to_vec();
        frame.extend_from_slice(TERMINATOR);

        self.discard_input()?;
        self.write_frame(&frame)?;
        self.read_reply()
    }

    /// The transport this link writes to.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Consume the link and return its transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn write_frame(&mut self, frame: &[u8]) -> WheelResult<()> {
        debug!("CMD <{}>", dump(frame));
        self.transport.write_all(frame)?;
        Ok(())
    }
}
