//! B3M Servo Tool
//!
//! A small command line tool for poking at servos on a B3M bus.
//!
//! Usage:
//!   cargo run --example b3m_tool -- [OPTIONS] <COMMAND>
//!
//! Commands:
//!   ports             List serial ports, likeliest adapters first
//!   info              Print model, firmware version, mode and position
//!   scan              Query ids 0-254 and list the servos that answer
//!   set-id NEW_ID     Give the servo a new id, save it and reset
//!   set-pos POS       Switch to position control and move to POS
//!   status [COUNT]    Poll motor status COUNT times (default 50) every 20ms
//!   get REGISTER      Read one register by name (e.g. current_position)
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyUSB0)
//!   --baud RATE       Baud rate (default: 1500000)
//!   --id ID           Servo id (default: 0)
//!   --timeout MS      Reply timeout in ms (default: 100)
//!   --config FILE     Load connection settings from a JSON file
//!
//! Set RUST_LOG=b3m_core=debug to see every frame.

use anyhow::{bail, Context, Result};
use b3m_core::prelude::*;
use b3m_core::protocol::list_ports;
use b3m_core::servo::registers;
use std::time::Duration;

enum Command {
    Ports,
    Info,
    Scan,
    SetId(u8),
    SetPos(i16),
    Status(u32),
    Get(Register),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = ConnectionConfig::for_port("/dev/ttyUSB0");
    let mut id = 0u8;
    let mut command = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                config.port_name = value(&args, i, "--port")?.to_string();
            }
            "--baud" | "-b" => {
                i += 1;
                config.baud_rate = value(&args, i, "--baud")?.parse()?;
            }
            "--id" => {
                i += 1;
                id = value(&args, i, "--id")?.parse()?;
            }
            "--timeout" | "-t" => {
                i += 1;
                config.timeout_ms = value(&args, i, "--timeout")?.parse()?;
            }
            "--config" | "-c" => {
                i += 1;
                let path = value(&args, i, "--config")?;
                config = ConnectionConfig::from_json_file(path)
                    .with_context(|| format!("reading {}", path))?;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "ports" => command = Some(Command::Ports),
            "info" => command = Some(Command::Info),
            "scan" => command = Some(Command::Scan),
            "set-id" => {
                i += 1;
                command = Some(Command::SetId(value(&args, i, "set-id")?.parse()?));
            }
            "set-pos" => {
                i += 1;
                command = Some(Command::SetPos(value(&args, i, "set-pos")?.parse()?));
            }
            "status" => {
                let count = match args.get(i + 1).and_then(|a| a.parse().ok()) {
                    Some(n) => {
                        i += 1;
                        n
                    }
                    None => 50,
                };
                command = Some(Command::Status(count));
            }
            "get" => {
                i += 1;
                let name = value(&args, i, "get")?;
                let Some(register) = Register::by_name(name) else {
                    let known: Vec<&str> = registers::ALL.iter().map(|r| r.name).collect();
                    bail!("Unknown register {} (one of: {})", name, known.join(", "));
                };
                command = Some(Command::Get(register));
            }
            other => bail!("Unknown argument: {} (try --help)", other),
        }
        i += 1;
    }

    let Some(command) = command else {
        print_help();
        return Ok(());
    };

    if let Command::Ports = command {
        let ports = list_ports();
        if ports.is_empty() {
            println!("no serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    let conn = Connection::open(config.clone())
        .with_context(|| format!("opening {}", config.port_name))?;

    match command {
        Command::Ports => Ok(()),
        Command::Info => info(&conn, id),
        Command::Scan => {
            let found = conn.scan(0..BROADCAST_ID);
            for servo in &found {
                println!(
                    "id:{:<3} Model:{} Version:{}",
                    servo.id, servo.info.model, servo.info.version
                );
            }
            println!("ok found: {}", found.len());
            Ok(())
        }
        Command::SetId(new_id) => {
            let mut servo = conn.servo(id);
            servo.change_id(new_id)?;
            servo.save()?;
            servo.reset(0)?;
            println!("ok: servo {} is now {}", id, new_id);
            Ok(())
        }
        Command::SetPos(pos) => {
            let mut servo = conn.servo(id);
            servo.set_mode(operating_mode(ControlMode::Position, RunMode::Normal))?;
            servo.set_position(pos)?;
            report(&servo);
            Ok(())
        }
        Command::Status(count) => poll_status(&conn, id, count),
        Command::Get(register) => {
            let mut servo = conn.servo(id);
            let reading = servo.read_register(register)?;
            println!("{} @0x{:02x}: {}", register.name, register.address, reading);
            report(&servo);
            Ok(())
        }
    }
}

fn info(conn: &Connection, id: u8) -> Result<()> {
    let mut servo = conn.servo(id);

    let version = servo.get_version()?;
    println!("Model:{} Version:{}", version.model, version.version);

    let mode = servo.get_mode()?;
    println!("mode {}", mode);

    let pos = servo.get_current_position()?;
    println!("pos: {}", pos);

    report(&servo);
    Ok(())
}

fn poll_status(conn: &Connection, id: u8, count: u32) -> Result<()> {
    let mut servo = conn.servo(id);

    servo.set_mode(operating_mode(ControlMode::Position, RunMode::Normal))?;
    let pos = servo.get_current_position()?;
    servo.set_position(pos)?;

    for _ in 0..count {
        match servo.get_motor_status() {
            Ok(ms) => {
                let pos = servo.get_current_position().unwrap_or(pos);
                println!(
                    "Motor: T:{:.2}\tI:{:.3}(A)\tV:{:.3}(V)\tD:{:.3}\tpos:{}",
                    ms.temperature, ms.current, ms.voltage, ms.duty_ratio, pos
                );
            }
            Err(e) => eprintln!("error {}", e),
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    servo.set_mode(operating_mode(ControlMode::Position, RunMode::Free))?;
    Ok(())
}

fn report(servo: &Servo<'_>) {
    if !servo.status().is_ok() {
        eprintln!("servo {} reports {}", servo.id, servo.status());
    }
}

fn value<'a>(args: &'a [String], i: usize, name: &str) -> Result<&'a str> {
    match args.get(i) {
        Some(v) => Ok(v.as_str()),
        None => bail!("{} needs a value", name),
    }
}

fn print_help() {
    println!("B3M Servo Tool");
    println!();
    println!("Usage: b3m_tool [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  ports             List serial ports, likeliest adapters first");
    println!("  info              Print model, firmware version, mode and position");
    println!("  scan              Query ids 0-254 and list the servos that answer");
    println!("  set-id NEW_ID     Give the servo a new id, save it and reset");
    println!("  set-pos POS       Switch to position control and move to POS");
    println!("  status [COUNT]    Poll motor status COUNT times (default 50)");
    println!("  get REGISTER      Read one register by name (e.g. current_position)");
    println!();
    println!("Options:");
    println!("  --port PORT       Serial port (default: /dev/ttyUSB0)");
    println!("  --baud RATE       Baud rate (default: 1500000)");
    println!("  --id ID           Servo id (default: 0)");
    println!("  --timeout MS      Reply timeout in ms (default: 100)");
    println!("  --config FILE     Load connection settings from a JSON file");
}
