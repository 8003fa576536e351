//! Simulated B3M bus for integration tests
//!
//! `BusWriter` parses each request written by the connection and lets the
//! simulated servos answer it; answers are fed back through `BusReader`.
//! Nothing here touches real hardware.

#![allow(dead_code)]

use b3m_core::protocol::{CommandType, Connection, ConnectionConfig, Frame, BROADCAST_ID};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// One simulated device
#[derive(Debug, Clone)]
pub struct SimServo {
    pub id: u8,
    pub memory: Vec<u8>,
    /// Option byte put on every reply
    pub status: u8,
    /// Never answers
    pub silent: bool,
    /// Answer only after this long
    pub reply_delay: Option<Duration>,
}

impl SimServo {
    pub fn new(id: u8) -> Self {
        let mut memory = vec![0u8; 256];
        memory[0] = id;
        Self {
            id,
            memory,
            status: 0,
            silent: false,
            reply_delay: None,
        }
    }

    fn handle(&mut self, request: &Frame) -> Option<Frame> {
        let data = match request.command {
            CommandType::Read => {
                let addr = request.data[0] as usize;
                let size = request.data[1] as usize;
                self.memory[addr..addr + size].to_vec()
            }
            CommandType::Write => {
                let n = request.data.len() - 2;
                let addr = request.data[n] as usize;
                self.memory[addr..addr + n].copy_from_slice(&request.data[..n]);
                Vec::new()
            }
            CommandType::Position => {
                self.memory[0x2A..0x2C].copy_from_slice(&request.data[0..2]);
                Vec::new()
            }
            CommandType::Reset => return None,
            _ => Vec::new(),
        };
        Some(Frame {
            command: request.command,
            option: self.status,
            id: self.id,
            data,
        })
    }
}

type Link = Arc<Mutex<Option<Sender<Vec<u8>>>>>;

/// Test-side view of the bus
#[derive(Clone)]
pub struct Bus {
    servos: Arc<Mutex<Vec<SimServo>>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    link: Link,
}

impl Bus {
    pub fn new() -> (Self, BusReader, BusWriter) {
        let (tx, rx) = unbounded();
        let bus = Self {
            servos: Arc::new(Mutex::new(Vec::new())),
            written: Arc::new(Mutex::new(Vec::new())),
            link: Arc::new(Mutex::new(Some(tx))),
        };
        let reader = BusReader {
            rx,
            pending: Vec::new(),
            pos: 0,
        };
        let writer = BusWriter {
            bus: bus.clone(),
            partial: Vec::new(),
            fail: false,
        };
        (bus, reader, writer)
    }

    /// Bus plus a connection bound to it
    pub fn connect(config: ConnectionConfig) -> (Self, Connection) {
        let (bus, reader, writer) = Self::new();
        let conn = Connection::from_split(reader, writer, config).expect("spawn reader");
        (bus, conn)
    }

    pub fn add_servo(&self, servo: SimServo) {
        self.servos.lock().unwrap().push(servo);
    }

    pub fn with_servo<T>(&self, id: u8, f: impl FnOnce(&mut SimServo) -> T) -> T {
        let mut servos = self.servos.lock().unwrap();
        let servo = servos
            .iter_mut()
            .find(|s| s.id == id)
            .expect("no such simulated servo");
        f(servo)
    }

    /// Every frame written by the connection, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    /// Push a frame onto the reply line as if a device had sent it
    pub fn inject(&self, frame: &Frame) {
        self.push(frame.to_bytes().unwrap());
    }

    pub fn push(&self, bytes: Vec<u8>) {
        if let Some(tx) = self.link.lock().unwrap().as_ref() {
            let _ = tx.send(bytes);
        }
    }

    /// End the reply stream
    pub fn close(&self) {
        self.link.lock().unwrap().take();
    }

    fn dispatch(&self, raw: Vec<u8>) {
        let request = Frame::from_bytes(&raw).expect("connection wrote a malformed frame");
        self.written.lock().unwrap().push(raw);

        let mut servos = self.servos.lock().unwrap();
        for servo in servos.iter_mut() {
            if request.id != servo.id && request.id != BROADCAST_ID {
                continue;
            }
            let reply = servo.handle(&request);
            if request.id == BROADCAST_ID || servo.silent {
                continue;
            }
            if let Some(reply) = reply {
                let bytes = reply.to_bytes().unwrap();
                match servo.reply_delay {
                    Some(delay) => {
                        let bus = self.clone();
                        thread::spawn(move || {
                            thread::sleep(delay);
                            bus.push(bytes);
                        });
                    }
                    None => self.push(bytes),
                }
            }
        }
    }
}

/// Read half handed to the connection
pub struct BusReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for BusReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Write half handed to the connection
pub struct BusWriter {
    bus: Bus,
    partial: Vec<u8>,
    pub fail: bool,
}

impl BusWriter {
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Write for BusWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "line down"));
        }
        self.partial.extend_from_slice(buf);
        while !self.partial.is_empty() && self.partial.len() >= self.partial[0] as usize {
            let len = self.partial[0] as usize;
            let raw: Vec<u8> = self.partial.drain(..len).collect();
            self.bus.dispatch(raw);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Opt-in log output: `RUST_LOG=b3m_core=debug cargo test`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
