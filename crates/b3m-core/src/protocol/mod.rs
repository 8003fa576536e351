//! Serial Protocol Communication
//!
//! Implements the B3M framed binary protocol: every frame is length-prefixed
//! and closed by an 8-bit additive checksum. Requests and replies are paired
//! purely by order; a bus never has more than one request in flight.

pub mod command_builder;
pub mod commands;
mod connection;
mod error;
mod packet;
pub mod serial;
pub mod stream;

pub use command_builder::CommandBuilder;
pub use commands::{is_broadcast, CommandType};
pub use connection::{Connection, ConnectionConfig, ConnectionState, ScanResult};
pub use error::ProtocolError;
pub use packet::{checksum, Frame};
pub use serial::{clear_buffers, configure_port, list_ports, open_port, PortInfo};
pub use stream::{CommunicationChannel, SerialChannel, TcpChannel};

/// Default baud rate of factory-configured B3M servos
pub const DEFAULT_BAUD_RATE: u32 = 1_500_000;

/// Default reply timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Default per-call serial read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Device id addressing every servo on the bus; nobody replies to it
pub const BROADCAST_ID: u8 = 255;

/// Length, command, option, id and checksum bytes
pub const FRAME_OVERHEAD: usize = 5;

/// Maximum payload length
pub const MAX_DATA_LEN: usize = 250;

/// Maximum frame size on the wire
pub const MAX_FRAME_LEN: usize = MAX_DATA_LEN + FRAME_OVERHEAD;
