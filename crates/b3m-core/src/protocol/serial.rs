//! Serial port handling
//!
//! Opens and configures the port a B3M bus hangs off. Nothing here speaks the
//! protocol; the connection only needs the resulting byte stream.

use serialport::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType,
    StopBits,
};
use std::fmt;
use std::time::Duration;

use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS};

/// A serial port a bus adapter might be plugged into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Name to pass to [`open_port`], e.g. "/dev/ttyUSB0" or "COM3"
    pub name: String,
    /// USB vendor and product ids, for USB adapters
    pub usb_id: Option<(u16, u16)>,
    /// Adapter description reported by the OS, if any
    pub product: Option<String>,
}

impl PortInfo {
    /// Whether the port is a USB adapter
    pub fn is_usb(&self) -> bool {
        self.usb_id.is_some()
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (usb_id, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => (Some((usb.vid, usb.pid)), usb.product),
            _ => (None, None),
        };
        Self {
            name: info.port_name,
            usb_id,
            product,
        }
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some((vid, pid)) = self.usb_id {
            write!(f, " [{:04x}:{:04x}]", vid, pid)?;
        }
        if let Some(product) = &self.product {
            write!(f, " {}", product)?;
        }
        Ok(())
    }
}

/// USB adapters first, then by name with trailing numbers compared as numbers
/// so ttyUSB2 sorts before ttyUSB10
fn port_order(port: &PortInfo) -> (bool, String, u32) {
    let digits = port.name.len()
        - port
            .name
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .count();
    let (stem, num) = port.name.split_at(digits);
    (!port.is_usb(), stem.to_string(), num.parse().unwrap_or(0))
}

/// Serial ports the OS knows about, likeliest bus adapters first. An
/// enumeration failure is logged and yields an empty list.
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = match serialport::available_ports() {
        Ok(found) => found.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            tracing::warn!("serial port enumeration failed: {}", e);
            Vec::new()
        }
    };
    ports.sort_by_key(port_order);
    ports.dedup_by(|a, b| a.name == b.name);
    ports
}

/// Open `name` at `baud_rate` (default 1.5 Mbaud). `read_timeout_ms` only
/// bounds each read call; the connection's reader treats an expired read as an
/// idle line.
pub fn open_port(
    name: &str,
    baud_rate: Option<u32>,
    read_timeout_ms: Option<u64>,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    let timeout = Duration::from_millis(read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS));

    tracing::debug!(port = name, baud, "opening serial port");
    serialport::new(name, baud)
        .timeout(timeout)
        .open()
        .map_err(serial_error)
}

/// Put the port in the bus line format: 8 data bits, no parity, one stop bit,
/// no flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(DataBits::Eight).map_err(serial_error)?;
    port.set_parity(Parity::None).map_err(serial_error)?;
    port.set_stop_bits(StopBits::One).map_err(serial_error)?;
    port.set_flow_control(FlowControl::None).map_err(serial_error)
}

/// Drop anything queued in either direction
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(ClearBuffer::All).map_err(serial_error)
}

fn serial_error(e: serialport::Error) -> ProtocolError {
    ProtocolError::SerialError(e.to_string())
}
