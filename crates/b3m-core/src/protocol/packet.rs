//! Frame encoding/decoding
//!
//! Frame format:
//! - 1 byte: total frame length (payload + 5)
//! - 1 byte: command code
//! - 1 byte: option (flags on requests, status on replies)
//! - 1 byte: device id
//! - N bytes: payload
//! - 1 byte: checksum (8-bit sum of every preceding byte)
//!
//! Decoding consumes the checksum byte without verifying it unless the checked
//! variant is used.

use std::io::{ErrorKind, Read};

use super::{CommandType, ProtocolError, FRAME_OVERHEAD, MAX_DATA_LEN, MAX_FRAME_LEN};

/// A protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command code
    pub command: CommandType,
    /// Option byte (request flags / reply status)
    pub option: u8,
    /// Device id, 255 for broadcast
    pub id: u8,
    /// Payload, at most 250 bytes
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a request frame with a zero option byte
    pub fn new(command: CommandType, id: u8, data: Vec<u8>) -> Self {
        Self {
            command,
            option: 0,
            id,
            data,
        }
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.data.len() > MAX_DATA_LEN {
            return Err(ProtocolError::PayloadTooLarge(self.data.len()));
        }

        let len = self.encoded_size();
        let mut bytes = Vec::with_capacity(len);
        bytes.push(len as u8);
        bytes.push(self.command.to_byte());
        bytes.push(self.option);
        bytes.push(self.id);
        bytes.extend_from_slice(&self.data);
        bytes.push(checksum(&bytes));

        Ok(bytes)
    }

    /// Get the total encoded size
    pub fn encoded_size(&self) -> usize {
        self.data.len() + FRAME_OVERHEAD
    }

    /// Read one frame from a stream without checking its checksum
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, ProtocolError> {
        read_frame(reader).map(|(frame, _)| frame)
    }

    /// Read one frame and reject it if the trailing checksum does not match
    pub fn read_checked<R: Read + ?Sized>(reader: &mut R) -> Result<Self, ProtocolError> {
        let (frame, raw) = read_frame(reader)?;
        let (body, trailer) = raw.split_at(raw.len() - 1);
        let expected = checksum(body);
        if trailer[0] != expected {
            return Err(ProtocolError::ChecksumMismatch {
                expected,
                actual: trailer[0],
            });
        }
        Ok(frame)
    }

    /// Decode a frame from a byte slice
    pub fn from_bytes(mut data: &[u8]) -> Result<Self, ProtocolError> {
        Self::read_from(&mut data)
    }
}

/// 8-bit wrapping sum of `bytes`
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Read the length byte, then the rest of the frame. Returns the decoded frame
/// along with the raw wire bytes.
fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<(Frame, Vec<u8>), ProtocolError> {
    let mut buf = [0u8; MAX_FRAME_LEN];

    loop {
        match reader.read(&mut buf[..1]) {
            Ok(0) => return Err(ProtocolError::EndOfStream),
            Ok(_) => break,
            Err(e) if is_transient(&e) => continue,
            Err(e) => return Err(ProtocolError::Read(e)),
        }
    }

    let len = buf[0] as usize;
    if len < FRAME_OVERHEAD {
        return Err(ProtocolError::InvalidLength(buf[0]));
    }

    let mut filled = 1;
    while filled < len {
        match reader.read(&mut buf[filled..len]) {
            Ok(0) => {
                return Err(ProtocolError::Read(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("stream closed after {} of {} frame bytes", filled, len),
                )))
            }
            Ok(n) => filled += n,
            Err(e) if is_transient(&e) => continue,
            Err(e) => return Err(ProtocolError::Read(e)),
        }
    }

    let frame = Frame {
        command: CommandType::from_byte(buf[1]),
        option: buf[2],
        id: buf[3],
        data: buf[4..len - 1].to_vec(),
    };

    Ok((frame, buf[..len].to_vec()))
}

/// Serial ports opened with a read timeout report idle lines as errors
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}
