//! # B3M Core Library
//!
//! Driver for B3M serial bus servo motors.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame encoding/decoding for the B3M binary protocol
//! - A bus connection with a background reader and single-slot reply mailbox
//! - Per-servo handles with typed register accessors
//!
//! ## Example
//!
//! ```rust,no_run
//! use b3m_core::protocol::{Connection, ConnectionConfig};
//! use b3m_core::servo::{operating_mode, ControlMode, RunMode};
//!
//! let conn = Connection::open(ConnectionConfig::for_port("/dev/ttyUSB0"))?;
//! let mut servo = conn.servo(0);
//!
//! let info = servo.get_version()?;
//! println!("{} firmware {}", info.model, info.version);
//!
//! servo.set_mode(operating_mode(ControlMode::Position, RunMode::Normal))?;
//! let pos = servo.get_current_position()?;
//! servo.set_position(pos + 200)?;
//! # Ok::<(), b3m_core::protocol::ProtocolError>(())
//! ```

pub mod protocol;
pub mod servo;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        Connection, ConnectionConfig, ConnectionState, Frame, ProtocolError, BROADCAST_ID,
    };
    pub use crate::servo::{
        operating_mode, ControlMode, MotorStatus, Register, RegisterValue, RunMode, Servo,
        ServoStatus, TrajectoryType, VersionInfo,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
