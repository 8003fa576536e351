//! Protocol errors

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Writing a frame to the stream failed
    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Reading a frame from the stream failed part way through
    #[error("Read failed: {0}")]
    Read(#[source] std::io::Error),

    /// No reply arrived within the configured window
    #[error("Reply timeout")]
    Timeout,

    /// The stream reported end of input before a new frame started
    #[error("End of stream")]
    EndOfStream,

    /// Frame payload exceeds what the length byte can carry
    #[error("Payload too large: {0} bytes (max {max})", max = super::MAX_DATA_LEN)]
    PayloadTooLarge(usize),

    /// Length byte smaller than the fixed frame overhead
    #[error("Invalid frame length byte: {0}")]
    InvalidLength(u8),

    /// Trailing checksum does not match the frame contents
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Sum computed over the received bytes
        expected: u8,
        /// Checksum byte on the wire
        actual: u8,
    },

    /// Reply carried fewer data bytes than the register needs
    #[error("Short reply: expected {expected} bytes, got {actual}")]
    ShortReply {
        /// Bytes required
        expected: usize,
        /// Bytes received
        actual: usize,
    },

    /// Value shape does not match a register's encoding
    #[error("Register encoding mismatch: {0}")]
    Encoding(String),

    /// Opening or configuring a serial port failed
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Config document could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the error ends the connection for good: the reader stops after
    /// delivering it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolError::EndOfStream | ProtocolError::Read(_))
    }
}
