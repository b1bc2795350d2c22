//! Driver for Quantum motorized filter wheels.
//!
//! The wheel is controlled over a USB serial port or a serial-over-TCP bridge
//! with a line-oriented ASCII protocol. This crate provides:
//!
//! - [`transport`]: serial and TCP byte transports behind one trait
//! - [`protocol`]: command encoding and typed reply parsing
//! - [`Link`]: request/response exchanges with diagnostics
//! - [`QuantumWheel`]: handshake, settings discovery, filter moves and
//!   settings updates
//! - [`WheelHost`]: the interface through which the driver reports to its host
//! - [`mock`]: a scripted transport and recording host for tests
//!
//! # Example
//!
//! ```no_run
//! use quantum_wheel::{LogHost, QuantumWheel, SerialTransport, WheelConfig};
//!
//! let transport = SerialTransport::open("/dev/ttyACM0", 9600)?;
//! let mut wheel = QuantumWheel::connect(transport, LogHost, WheelConfig::default())?;
//! wheel.select_filter(2)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod link;
pub mod mock;
pub mod protocol;
pub mod transport;
pub mod wheel;

pub use config::{
    ConfigError, ConnectionConfig, WheelConfig, DEFAULT_BAUD_RATE, DEFAULT_SERIAL_PORT,
};
pub use error::{WheelError, WheelResult};
pub use host::{LogHost, PropertyKind, PropertyState, PropertyUpdate, WheelHost};
pub use link::Link;
pub use protocol::{DeviceIdentity, PRECISION_WORST};
pub use transport::{open_transport, SerialTransport, TcpTransport, Transport, TransportError};
pub use wheel::{QuantumWheel, Setting, SettingsStore, SwitchStatistics, UpdateSummary};
