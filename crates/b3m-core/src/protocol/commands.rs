//! Protocol commands
//!
//! Defines the command codes understood by B3M servos and the payload shapes
//! of the requests built from them.

use serde::{Deserialize, Serialize};

use super::BROADCAST_ID;

/// Command codes carried in byte 1 of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    /// Load parameters from ROM into RAM
    Load,

    /// Save RAM parameters to ROM
    Save,

    /// Read a block of device memory
    Read,

    /// Write a block of device memory
    Write,

    /// Restart the device
    Reset,

    /// Move to a position over a given time
    Position,

    /// Code not known to this driver, kept as received
    Unknown(u8),
}

impl CommandType {
    /// Wire byte for this command
    pub fn to_byte(self) -> u8 {
        match self {
            CommandType::Load => 1,
            CommandType::Save => 2,
            CommandType::Read => 3,
            CommandType::Write => 4,
            CommandType::Reset => 5,
            CommandType::Position => 6,
            CommandType::Unknown(b) => b,
        }
    }

    /// Decode a wire byte; unrecognised codes map to `Unknown`
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => CommandType::Load,
            2 => CommandType::Save,
            3 => CommandType::Read,
            4 => CommandType::Write,
            5 => CommandType::Reset,
            6 => CommandType::Position,
            other => CommandType::Unknown(other),
        }
    }

    /// Whether a device answers this command when addressed individually
    pub fn expects_response(self) -> bool {
        !matches!(self, CommandType::Reset)
    }
}

impl From<u8> for CommandType {
    fn from(b: u8) -> Self {
        CommandType::from_byte(b)
    }
}

impl From<CommandType> for u8 {
    fn from(cmd: CommandType) -> Self {
        cmd.to_byte()
    }
}

/// True when `id` addresses every device on the bus
pub fn is_broadcast(id: u8) -> bool {
    id == BROADCAST_ID
}
