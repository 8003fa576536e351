//! Servo command API
//!
//! A `Servo` is a lightweight handle for one device id on a shared
//! [`Connection`]. Each operation clears any stale reply, sends one request and
//! (unless the request is addressed to the broadcast id, or is a reset) blocks
//! for the next reply on the bus. Handles sharing a connection must not be used
//! concurrently: replies are matched to requests by order alone.

pub mod registers;
mod status;
mod values;

pub use registers::{
    operating_mode, ControlMode, Register, RegisterValue, RunMode, TrajectoryType,
};
pub use status::ServoStatus;
pub use values::{MotorStatus, VersionInfo};

use std::time::Duration;

use crate::protocol::{is_broadcast, CommandBuilder, Connection, Frame, ProtocolError};
use values::ensure_len;

/// What an exchange does once its request is on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    /// Return right away
    Skip,
    /// Wait for the reply, leave the status alone
    Await,
    /// Wait and take the reply's option byte as the new status
    Record,
}

/// Handle for one servo on a bus
#[derive(Debug)]
pub struct Servo<'a> {
    conn: &'a Connection,
    /// Device id requests are addressed to
    pub id: u8,
    /// How long to wait for each reply
    pub timeout_ms: u64,
    status: ServoStatus,
}

impl<'a> Servo<'a> {
    /// Handle for `id`, using the connection's configured timeout
    pub fn new(conn: &'a Connection, id: u8) -> Self {
        Self {
            conn,
            id,
            timeout_ms: conn.config().timeout_ms,
            status: ServoStatus::default(),
        }
    }

    /// Same handle with a different reply timeout
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Status flags from the most recent read or write
    pub fn status(&self) -> ServoStatus {
        self.status
    }

    /// Whether requests go to every device on the bus
    pub fn is_broadcast(&self) -> bool {
        is_broadcast(self.id)
    }

    fn commands(&self) -> CommandBuilder {
        CommandBuilder::new(self.id)
    }

    /// Broadcast requests get no reply
    fn unless_broadcast(&self, reply: Reply) -> Reply {
        if self.is_broadcast() {
            Reply::Skip
        } else {
            reply
        }
    }

    /// Send `request` and wait for the reply as `reply` says. With `min_len`
    /// set, a reply carrying fewer data bytes fails before the status is
    /// touched.
    fn exchange(
        &mut self,
        request: Frame,
        reply: Reply,
        min_len: Option<usize>,
    ) -> Result<Option<Frame>, ProtocolError> {
        self.conn.clear();
        self.conn.send(&request)?;
        if reply == Reply::Skip {
            return Ok(None);
        }

        let frame = self
            .conn
            .recv(Duration::from_millis(self.timeout_ms))
            .map_err(|e| {
                tracing::debug!(id = self.id, command = ?request.command, "exchange failed: {}", e);
                e
            })?;
        if let Some(n) = min_len {
            ensure_len(&frame.data, n)?;
        }

        if reply == Reply::Record {
            self.status = ServoStatus::from_bits(frame.option);
            if !self.status.is_ok() {
                tracing::debug!(id = self.id, status = %self.status, "device reported error");
            }
        }
        Ok(Some(frame))
    }

    fn read_exact(&mut self, register: Register) -> Result<Vec<u8>, ProtocolError> {
        let request = self.commands().read(register.address, register.size);
        let reply = self.exchange(request, Reply::Record, Some(register.size as usize))?;
        Ok(reply.map(|f| f.data).unwrap_or_default())
    }

    fn read_u8(&mut self, register: Register) -> Result<u8, ProtocolError> {
        match self.read_register(register)? {
            RegisterValue::U8(v) => Ok(v),
            other => Err(not_decoded_as(register, "u8", &other)),
        }
    }

    fn read_i16(&mut self, register: Register) -> Result<i16, ProtocolError> {
        match self.read_register(register)? {
            RegisterValue::I16(v) => Ok(v),
            other => Err(not_decoded_as(register, "i16", &other)),
        }
    }

    /// Read `size` bytes of device memory starting at `addr`
    pub fn read_memory(&mut self, addr: u8, size: u8) -> Result<Vec<u8>, ProtocolError> {
        let request = self.commands().read(addr, size);
        let reply = self.exchange(request, Reply::Record, None)?;
        Ok(reply.map(|f| f.data).unwrap_or_default())
    }

    /// Write `data` to device memory starting at `addr`. Returns as soon as the
    /// frame is written when addressed to the broadcast id, taking the
    /// request's own option byte as the status.
    pub fn write_memory(&mut self, addr: u8, data: &[u8]) -> Result<(), ProtocolError> {
        let request = self.commands().write(addr, data)?;
        if self.is_broadcast() {
            let option = request.option;
            self.exchange(request, Reply::Skip, None)?;
            self.status = ServoStatus::from_bits(option);
            return Ok(());
        }
        self.exchange(request, Reply::Record, None)?;
        Ok(())
    }

    /// Read a register and decode it by its encoding
    pub fn read_register(&mut self, register: Register) -> Result<RegisterValue, ProtocolError> {
        let data = self.read_exact(register)?;
        register.decode(&data)
    }

    /// Encode `value` for `register` and write it
    pub fn write_register(
        &mut self,
        register: Register,
        value: &RegisterValue,
    ) -> Result<(), ProtocolError> {
        let bytes = register.encode(value)?;
        self.write_memory(register.address, &bytes)
    }

    /// Load saved parameters from ROM
    pub fn load(&mut self) -> Result<(), ProtocolError> {
        let reply = self.unless_broadcast(Reply::Await);
        self.exchange(self.commands().load(), reply, None)?;
        Ok(())
    }

    /// Save current parameters to ROM
    pub fn save(&mut self) -> Result<(), ProtocolError> {
        let reply = self.unless_broadcast(Reply::Await);
        self.exchange(self.commands().save(), reply, None)?;
        Ok(())
    }

    /// Restart the device. Never waits: a resetting servo does not answer.
    pub fn reset(&mut self, time_after: u8) -> Result<(), ProtocolError> {
        self.exchange(self.commands().reset(time_after), Reply::Skip, None)?;
        Ok(())
    }

    /// Move to `pos`, interpolating over `time` (device units, ms)
    pub fn set_position_with_time(&mut self, pos: i16, time: i16) -> Result<(), ProtocolError> {
        let reply = self.unless_broadcast(Reply::Await);
        self.exchange(self.commands().position(pos, time), reply, None)?;
        Ok(())
    }

    /// Model name and firmware version
    pub fn get_version(&mut self) -> Result<VersionInfo, ProtocolError> {
        let data = self.read_exact(registers::VERSION)?;
        VersionInfo::from_bytes(&data)
    }

    /// Current mode byte
    pub fn get_mode(&mut self) -> Result<u8, ProtocolError> {
        self.read_u8(registers::MODE)
    }

    /// Set the mode byte; see [`operating_mode`]
    pub fn set_mode(&mut self, mode: u8) -> Result<(), ProtocolError> {
        self.write_register(registers::MODE, &RegisterValue::U8(mode))
    }

    /// Select the interpolation curve for position moves
    pub fn set_trajectory_mode(&mut self, kind: TrajectoryType) -> Result<(), ProtocolError> {
        self.write_register(registers::TRAJECTORY_MODE, &RegisterValue::U8(kind.to_byte()))
    }

    /// Set the target position
    pub fn set_position(&mut self, pos: i16) -> Result<(), ProtocolError> {
        self.write_register(registers::TARGET_POSITION, &RegisterValue::I16(pos))
    }

    /// Measured shaft position
    pub fn get_current_position(&mut self) -> Result<i16, ProtocolError> {
        self.read_i16(registers::CURRENT_POSITION)
    }

    /// Set the target velocity
    pub fn set_velocity(&mut self, velocity: i16) -> Result<(), ProtocolError> {
        self.write_register(registers::VELOCITY_LIMIT, &RegisterValue::I16(velocity))
    }

    /// Set the target torque
    pub fn set_torque(&mut self, torque: i16) -> Result<(), ProtocolError> {
        self.write_register(registers::TORQUE_LIMIT, &RegisterValue::I16(torque))
    }

    /// Temperature, current, voltage and duty ratio
    pub fn get_motor_status(&mut self) -> Result<MotorStatus, ProtocolError> {
        let data = self.read_exact(registers::MOTOR_STATUS)?;
        MotorStatus::from_bytes(&data)
    }

    /// Give the device a new id and retarget this handle at it. The device
    /// answers under its old id; the change only survives a power cycle after
    /// [`save`](Self::save).
    pub fn change_id(&mut self, new_id: u8) -> Result<(), ProtocolError> {
        self.write_register(registers::SERVO_ID, &RegisterValue::U8(new_id))?;
        tracing::info!(old = self.id, new = new_id, "servo id changed");
        self.id = new_id;
        Ok(())
    }
}

fn not_decoded_as(register: Register, wanted: &str, got: &RegisterValue) -> ProtocolError {
    ProtocolError::Encoding(format!(
        "register {} decoded as {:?}, not {}",
        register.name, got, wanted
    ))
}
