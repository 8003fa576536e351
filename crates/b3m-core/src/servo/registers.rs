//! Register map
//!
//! Fixed offsets of the device parameters this driver knows about, and the
//! mode values written into them.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::values::ensure_len;
use crate::protocol::ProtocolError;

/// How a register's bytes are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterEncoding {
    /// Opaque byte block
    Bytes,
    /// Single unsigned byte
    U8,
    /// Signed 16-bit little-endian
    I16Le,
}

/// A named location in device memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Register {
    /// Lookup name, snake case
    pub name: &'static str,
    /// First byte in device memory
    pub address: u8,
    /// Width in bytes
    pub size: u8,
    /// How the bytes decode
    pub encoding: RegisterEncoding,
}

impl Register {
    const fn new(name: &'static str, address: u8, size: u8, encoding: RegisterEncoding) -> Self {
        Self {
            name,
            address,
            size,
            encoding,
        }
    }

    /// Look up a register by name
    pub fn by_name(name: &str) -> Option<Register> {
        ALL.iter().copied().find(|r| r.name == name)
    }

    /// Decode `data` read from this register. `data` must hold at least
    /// `size` bytes; anything past that is ignored.
    pub fn decode(&self, data: &[u8]) -> Result<RegisterValue, ProtocolError> {
        let size = self.size as usize;
        ensure_len(data, size)?;
        Ok(match self.encoding {
            RegisterEncoding::Bytes => RegisterValue::Bytes(data[..size].to_vec()),
            RegisterEncoding::U8 => RegisterValue::U8(data[0]),
            RegisterEncoding::I16Le => RegisterValue::I16(LittleEndian::read_i16(data)),
        })
    }

    /// Wire bytes for writing `value` here. Fails if the value's shape does
    /// not match the register's encoding.
    pub fn encode(&self, value: &RegisterValue) -> Result<Vec<u8>, ProtocolError> {
        match (self.encoding, value) {
            (RegisterEncoding::U8, RegisterValue::U8(v)) => Ok(vec![*v]),
            (RegisterEncoding::I16Le, RegisterValue::I16(v)) => {
                let mut buf = vec![0u8; 2];
                LittleEndian::write_i16(&mut buf, *v);
                Ok(buf)
            }
            (RegisterEncoding::Bytes, RegisterValue::Bytes(v)) if v.len() == self.size as usize => {
                Ok(v.clone())
            }
            _ => Err(ProtocolError::Encoding(format!(
                "{:?} does not fit register {} ({:?}, {} bytes)",
                value, self.name, self.encoding, self.size
            ))),
        }
    }
}

/// A decoded register value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RegisterValue {
    /// Raw block
    Bytes(Vec<u8>),
    /// Single byte
    U8(u8),
    /// Signed 16-bit word
    I16(i16),
}

impl std::fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterValue::Bytes(b) => write!(f, "{:02x?}", b),
            RegisterValue::U8(v) => write!(f, "{} (0x{:02x})", v, v),
            RegisterValue::I16(v) => write!(f, "{}", v),
        }
    }
}

/// Device id
pub const SERVO_ID: Register = Register::new("id", 0x00, 1, RegisterEncoding::U8);
/// Operating mode byte, see [`operating_mode`]
pub const MODE: Register = Register::new("mode", 0x28, 1, RegisterEncoding::U8);
/// Interpolation curve, see [`TrajectoryType`]
pub const TRAJECTORY_MODE: Register =
    Register::new("trajectory_mode", 0x29, 1, RegisterEncoding::U8);
/// Position the servo moves to, 0.01 degree units
pub const TARGET_POSITION: Register =
    Register::new("target_position", 0x2A, 2, RegisterEncoding::I16Le);
/// Measured position
pub const CURRENT_POSITION: Register =
    Register::new("current_position", 0x2C, 2, RegisterEncoding::I16Le);
/// Target velocity
pub const VELOCITY_LIMIT: Register =
    Register::new("velocity_limit", 0x30, 2, RegisterEncoding::I16Le);
/// Target torque
pub const TORQUE_LIMIT: Register = Register::new("torque_limit", 0x3C, 2, RegisterEncoding::I16Le);
/// Temperature, current, voltage, duty and PWM cycle, five u16 LE words
pub const MOTOR_STATUS: Register = Register::new("motor_status", 0x46, 10, RegisterEncoding::Bytes);
/// Model and firmware version block
pub const VERSION: Register = Register::new("version", 0xA2, 12, RegisterEncoding::Bytes);

/// Every register in the map
pub const ALL: [Register; 9] = [
    SERVO_ID,
    MODE,
    TRAJECTORY_MODE,
    TARGET_POSITION,
    CURRENT_POSITION,
    VELOCITY_LIMIT,
    TORQUE_LIMIT,
    MOTOR_STATUS,
    VERSION,
];

/// Run state, low two bits of the mode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Powered, following the control loop
    Normal,
    /// Output unpowered, shaft turns freely
    Free,
    /// Holding the current position
    Hold,
}

impl RunMode {
    /// Mode byte bits for this run state
    pub fn to_byte(self) -> u8 {
        match self {
            RunMode::Normal => 0,
            RunMode::Free => 2,
            RunMode::Hold => 3,
        }
    }
}

/// Control loop selection, bits 2-3 of the mode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    /// Track the target position
    Position,
    /// Track the target velocity
    Velocity,
    /// Track the target torque
    Torque,
    /// Position control with feed-forward terms
    FeedForward,
}

impl ControlMode {
    /// Mode byte bits for this control loop
    pub fn to_byte(self) -> u8 {
        match self {
            ControlMode::Position => 0,
            ControlMode::Velocity => 4,
            ControlMode::Torque => 8,
            ControlMode::FeedForward => 12,
        }
    }
}

/// Mode byte for `control` in run state `run`
pub fn operating_mode(control: ControlMode, run: RunMode) -> u8 {
    control.to_byte() | run.to_byte()
}

/// Interpolation curve used when moving to a new target position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrajectoryType {
    /// Jump straight to the target
    Normal,
    /// Constant speed
    Even,
    /// Third-order polynomial
    ThirdPoly,
    /// Fourth-order polynomial
    FourthPoly,
    /// Fifth-order polynomial
    FifthPoly,
}

impl TrajectoryType {
    /// Value written to the trajectory register
    pub fn to_byte(self) -> u8 {
        match self {
            TrajectoryType::Normal => 0,
            TrajectoryType::Even => 1,
            TrajectoryType::ThirdPoly => 3,
            TrajectoryType::FourthPoly => 4,
            TrajectoryType::FifthPoly => 5,
        }
    }
}
