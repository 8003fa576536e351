//! Byte streams a bus can be reached through
//!
//! A connection needs two handles on one stream: the reader thread owns one,
//! writers share the other. Both serial ports and TCP sockets (serial-to-network
//! bridges) can be cloned that way.

use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// A bidirectional byte stream that can be split into reader and writer
pub trait CommunicationChannel: Read + Write + Send {
    /// Bound each read (and, where supported, write) call. A read that
    /// expires returns `TimedOut` or `WouldBlock`.
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard bytes received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Open a second handle on the same stream; the connection reads through it
    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>>;
}

/// Channel over a serial port
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened port; see [`open_port`](super::open_port)
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        let port = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialChannel { port }))
    }
}

/// Channel over a TCP connection to a serial bridge
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Wrap a connected socket
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Read for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl CommunicationChannel for TcpChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        // No flush syscall for sockets: drain with a non-blocking read.
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 256];
        let result = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        let stream = self.stream.try_clone()?;
        Ok(Box::new(TcpChannel { stream }))
    }
}
