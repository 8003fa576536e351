//! Command Builder
//!
//! Builds the request frames a B3M servo understands. Every request carries a
//! zero option byte; the payload shapes are:
//!
//! - Read:     `[addr, size]`
//! - Write:    `[data.., addr, 1]`
//! - Reset:    `[time_after]`
//! - Position: `[pos_lo, pos_hi, time_lo, time_hi]`
//! - Load/Save: empty

use byteorder::{ByteOrder, LittleEndian};

use super::{CommandType, Frame, ProtocolError, MAX_DATA_LEN};

/// Number of data blocks in a write request; this driver always writes one
const WRITE_BLOCK_COUNT: u8 = 1;

/// Builds request frames addressed to one device id
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder {
    id: u8,
}

impl CommandBuilder {
    /// Builder for requests to `id` (255 addresses every device)
    pub fn new(id: u8) -> Self {
        Self { id }
    }

    /// Device id the built frames are addressed to
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Read `size` bytes starting at `addr`
    pub fn read(&self, addr: u8, size: u8) -> Frame {
        Frame::new(CommandType::Read, self.id, vec![addr, size])
    }

    /// Write `data` starting at `addr`
    pub fn write(&self, addr: u8, data: &[u8]) -> Result<Frame, ProtocolError> {
        if data.len() + 2 > MAX_DATA_LEN {
            return Err(ProtocolError::PayloadTooLarge(data.len() + 2));
        }
        let mut payload = Vec::with_capacity(data.len() + 2);
        payload.extend_from_slice(data);
        payload.push(addr);
        payload.push(WRITE_BLOCK_COUNT);
        Ok(Frame::new(CommandType::Write, self.id, payload))
    }

    /// Copy parameters saved in ROM into working memory
    pub fn load(&self) -> Frame {
        Frame::new(CommandType::Load, self.id, Vec::new())
    }

    /// Persist working memory to ROM
    pub fn save(&self) -> Frame {
        Frame::new(CommandType::Save, self.id, Vec::new())
    }

    /// Reset after `time_after` (device units)
    pub fn reset(&self, time_after: u8) -> Frame {
        Frame::new(CommandType::Reset, self.id, vec![time_after])
    }

    /// Move to `pos` taking `time` to get there
    pub fn position(&self, pos: i16, time: i16) -> Frame {
        let mut payload = [0u8; 4];
        LittleEndian::write_i16(&mut payload[0..2], pos);
        LittleEndian::write_i16(&mut payload[2..4], time);
        Frame::new(CommandType::Position, self.id, payload.to_vec())
    }
}
