//! Errors raised by the wheel protocol engine.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can occur while talking to a Quantum wheel.
///
/// Every protocol-level failure aborts the operation in progress. Nothing is
/// retried inside the engine; retry is left to the caller.
#[derive(Error, Debug)]
pub enum WheelError {
    /// Writing a command to the link failed.
    #[error("Serial write error: {0}")]
    TransportWrite(std::io::Error),

    /// No complete reply line arrived within the per-read timeout.
    #[error("Timed out after {0:?} waiting for a reply")]
    TransportReadTimeout(Duration),

    /// Reading from the link failed.
    #[error("Serial read error: {0}")]
    TransportReadFailed(std::io::Error),

    /// The reply did not echo the command that elicited it.
    #[error("Unexpected reply: expected prefix '{expected}', got '{actual}'")]
    UnexpectedReply { expected: String, actual: String },

    /// A numeric or text payload could not be interpreted.
    #[error("Malformed value: {0}")]
    MalformedValue(String),

    /// The setting identifier was not discovered on this wheel.
    #[error("Unknown setting '{0}'")]
    UnknownSetting(char),

    /// A requested setting value lies outside the device range.
    #[error("Value {value} for setting '{id}' is outside [{min}, {max}]")]
    SettingValueOutOfRange {
        id: char,
        value: f64,
        min: f64,
        max: f64,
    },

    /// The wheel reported a failure in its extended move status.
    #[error("Error reported by device: {0}")]
    DeviceReportedError(String),

    /// The filter position is outside `1..=filter_count`.
    #[error("Filter position {requested} out of range 1-{count}")]
    OutOfRangePosition { requested: i32, count: u8 },

    /// The optional overall move deadline elapsed before the wheel confirmed.
    #[error("Move not confirmed within {0:?}")]
    MoveDeadlineExceeded(Duration),

    /// The configuration handed to the driver is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Real I/O was requested but no link is attached.
    #[error("No link to the wheel")]
    NotConnected,
}

/// Result type for wheel operations.
pub type WheelResult<T> = Result<T, WheelError>;

impl From<TransportError> for WheelError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Write(e) => WheelError::TransportWrite(e),
            TransportError::ReadTimeout(timeout) => WheelError::TransportReadTimeout(timeout),
            TransportError::ReadFailed(e) => WheelError::TransportReadFailed(e),
            TransportError::Open { endpoint, reason } => {
                WheelError::TransportWrite(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    format!("{endpoint}: {reason}"),
                ))
            }
        }
    }
}
