//! Error types for kaya-io

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// kaya-io error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Communication timeout
    #[error("Communication timeout")]
    Timeout,

    /// Checksum mismatch in a wire frame
    #[error("Checksum error: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumError {
        /// Expected checksum value
        expected: u8,
        /// Actual checksum value
        actual: u8,
    },

    /// Malformed or truncated frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Response carried a logical slot no sensor is bound to
    #[error("Unknown logical slot: {0}")]
    UnknownSlot(u8),

    /// Too many consecutive invalid ticks on one link
    #[error("Link failed after {0} consecutive invalid ticks")]
    LinkFailed(u32),

    /// No sensors discovered; streaming cannot start
    #[error("No sensors available")]
    NoSensors,

    /// A streaming session is already active
    #[error("A streaming session is already active")]
    SessionActive,

    /// Transport has been closed
    #[error("Transport closed")]
    TransportClosed,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Device refused or failed a command
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
