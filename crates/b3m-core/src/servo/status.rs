//! Device status byte
//!
//! Every reply carries the servo's error flags in its option byte.

use serde::{Deserialize, Serialize};
use std::fmt;

const SYSTEM_ERROR: u8 = 0x01;
const MOTOR_ERROR: u8 = 0x02;
const UART_ERROR: u8 = 0x04;
const COMMAND_ERROR: u8 = 0x08;

/// Error flags reported by a servo in its last reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServoStatus(u8);

impl ServoStatus {
    /// Wrap a reply option byte
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw option byte
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Device-level fault
    pub fn system_error(self) -> bool {
        self.0 & SYSTEM_ERROR != 0
    }

    /// Motor driver fault
    pub fn motor_error(self) -> bool {
        self.0 & MOTOR_ERROR != 0
    }

    /// Serial communication fault
    pub fn uart_error(self) -> bool {
        self.0 & UART_ERROR != 0
    }

    /// Last command was rejected
    pub fn command_error(self) -> bool {
        self.0 & COMMAND_ERROR != 0
    }

    /// No error flag set
    pub fn is_ok(self) -> bool {
        self.0 & (SYSTEM_ERROR | MOTOR_ERROR | UART_ERROR | COMMAND_ERROR) == 0
    }
}

impl From<u8> for ServoStatus {
    fn from(bits: u8) -> Self {
        Self(bits)
    }
}

impl fmt::Display for ServoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "ok");
        }
        let flags: Vec<&str> = [
            (self.system_error(), "system"),
            (self.motor_error(), "motor"),
            (self.uart_error(), "uart"),
            (self.command_error(), "command"),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| *name)
        .collect();
        write!(f, "{} error", flags.join("+"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let status = ServoStatus::from_bits(0b1010);
        assert!(!status.system_error());
        assert!(status.motor_error());
        assert!(!status.uart_error());
        assert!(status.command_error());
        assert!(!status.is_ok());
    }

    #[test]
    fn test_upper_bits_are_not_errors() {
        assert!(ServoStatus::from_bits(0x80).is_ok());
        assert_eq!(ServoStatus::from_bits(0x80).bits(), 0x80);
    }

    #[test]
    fn test_display() {
        assert_eq!(ServoStatus::default().to_string(), "ok");
        assert_eq!(ServoStatus::from_bits(0x05).to_string(), "system+uart error");
    }
}
