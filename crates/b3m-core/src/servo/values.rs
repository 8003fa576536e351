//! Decoded register values

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use super::registers;
use crate::protocol::ProtocolError;

/// Model name and firmware version read from the version block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    /// e.g. "B3M-SC-170-A"
    pub model: String,
    /// e.g. "1.2.0.3"
    pub version: String,
}

impl VersionInfo {
    /// Decode the 12-byte version block.
    ///
    /// Layout: `[0]` type letter, `[1..4]` model number digits (lowest first),
    /// `[6..8]` series letters (reversed), `[8..12]` version (lowest part first).
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(data, registers::VERSION.size as usize)?;

        let model = format!(
            "B3M-{}{}-{}{}{}-{}",
            data[7] as char, data[6] as char, data[3], data[2], data[1], data[0] as char
        );
        let version = format!("{}.{}.{}.{}", data[11], data[10], data[9], data[8]);
        Ok(Self { model, version })
    }
}

/// Electrical and thermal readings from the motor status block
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotorStatus {
    /// Degrees Celsius
    pub temperature: f32,
    /// Amperes
    pub current: f32,
    /// Volts
    pub voltage: f32,
    /// PWM duty over PWM cycle, 0 when the cycle reads 0
    pub duty_ratio: f32,
}

impl MotorStatus {
    /// Decode the 10-byte motor status block
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(data, registers::MOTOR_STATUS.size as usize)?;

        let word = |i: usize| LittleEndian::read_u16(&data[i * 2..i * 2 + 2]) as f32;
        let cycle = word(4);
        Ok(Self {
            temperature: word(0) / 100.0,
            current: word(1) / 1000.0,
            voltage: word(2) / 1000.0,
            duty_ratio: if cycle == 0.0 { 0.0 } else { word(3) / cycle },
        })
    }
}

pub(crate) fn ensure_len(data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() < expected {
        return Err(ProtocolError::ShortReply {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_version_from_index_bytes() {
        let data: Vec<u8> = (0..12).collect();
        let info = VersionInfo::from_bytes(&data).unwrap();
        assert_eq!(info.model, format!("B3M-{}{}-321-{}", 7u8 as char, 6u8 as char, 0u8 as char));
        assert_eq!(info.version, "11.10.9.8");
    }

    #[test]
    fn test_version_realistic() {
        let data = [b'A', 0, 7, 1, 0, 0, b'C', b'S', 3, 0, 2, 1];
        let info = VersionInfo::from_bytes(&data).unwrap();
        assert_eq!(info.model, "B3M-SC-170-A");
        assert_eq!(info.version, "1.2.0.3");
    }

    #[test]
    fn test_version_short() {
        assert!(matches!(
            VersionInfo::from_bytes(&[0; 11]),
            Err(ProtocolError::ShortReply {
                expected: 12,
                actual: 11
            })
        ));
    }

    #[test]
    fn test_motor_status() {
        // 35.00 C, 0.250 A, 12.000 V, duty 300/1000
        let data = [
            0xac, 0x0d, 0xfa, 0x00, 0xe0, 0x2e, 0x2c, 0x01, 0xe8, 0x03,
        ];
        let status = MotorStatus::from_bytes(&data).unwrap();
        assert_eq!(status.temperature, 35.0);
        assert_eq!(status.current, 0.25);
        assert_eq!(status.voltage, 12.0);
        assert!((status.duty_ratio - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_motor_status_zero_cycle() {
        let status = MotorStatus::from_bytes(&[0; 10]).unwrap();
        assert_eq!(status.duty_ratio, 0.0);
    }
}
