use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use chrono::{Timelike, Datelike};
use super::error::*;

pub const SERIAL_DEVICE: &str = "/dev/ttyS0";
pub const SERIAL_BAUD_RATE: u32 = 9600;
pub const TCP_ADDRESS: &str = "10.0.0.1:4060";
pub const TCP_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between command and reading reply. Protocol has no framing.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkMode {
    Usb,
    Wifi,
    Simulated,
    None,
}

impl LinkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Usb       => "USB",
            Self::Wifi      => "WiFi",
            Self::Simulated => "Sim",
            Self::None      => "none",
        }
    }
}

pub trait Transport: Send {
    fn link_mode(&self) -> LinkMode;

    /// Sends command and doesn't wait for reply
    fn write(&mut self, cmd: &str) -> Result<()>;

    /// Sends command, waits settle delay and returns reply without trailing `#`
    fn get(&mut self, cmd: &str) -> Result<String>;
}

/// Mount sends degree sign as raw byte 0xDF, it becomes `*` here
fn strip_reply(bytes: &[u8]) -> String {
    let bytes: Vec<u8> = bytes.iter()
        .map(|&b| if b == 0xDF { b'*' } else { b })
        .collect();
    String::from_utf8_lossy(&bytes)
        .trim_matches(|c: char| c == '#' || c.is_whitespace() || c == '\0')
        .to_string()
}

/// Requests precision and switches mount into high precision mode
fn probe(transport: &mut dyn Transport) -> Result<()> {
    let reply = transport.get(":P#")?;
    if reply.starts_with('L') {
        transport.write(":U#")?;
    }
    let reply = transport.get(":P#")?;
    if reply.is_empty() {
        return Err(Error::MalformedReply(":P#".to_string(), reply));
    }
    log::info!("Connected to Nexus in {} via {}", reply, transport.link_mode().as_str());
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        log::debug!("Opening serial port: {} at {} bps", path, baud);
        let port = serialport::new(path, baud)
            .timeout(SETTLE_DELAY)
            .open()?;
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn link_mode(&self) -> LinkMode {
        LinkMode::Usb
    }

    fn write(&mut self, cmd: &str) -> Result<()> {
        self.port.write_all(cmd.as_bytes())?;
        Ok(())
    }

    fn get(&mut self, cmd: &str) -> Result<String> {
        // stale bytes from previous write-only commands
        self.port.clear(serialport::ClearBuffer::Input)?;
        self.port.write_all(cmd.as_bytes())?;
        std::thread::sleep(SETTLE_DELAY);
        let available = self.port.bytes_to_read()? as usize;
        let mut buf = vec![0_u8; available];
        self.port.read_exact(&mut buf)?;
        Ok(strip_reply(&buf))
    }
}

///////////////////////////////////////////////////////////////////////////////

/// Nexus WiFi bridge. Connection is made for every exchange.
pub struct TcpTransport {
    addr: SocketAddr,
}

impl TcpTransport {
    pub fn new(addr: &str) -> Result<Self> {
        let addr = addr.to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Can't resolve {}", addr)
            ))?;
        Ok(Self { addr })
    }

    fn connect(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect_timeout(&self.addr, TCP_TIMEOUT)?;
        stream.set_read_timeout(Some(TCP_TIMEOUT))?;
        stream.set_write_timeout(Some(TCP_TIMEOUT))?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    fn link_mode(&self) -> LinkMode {
        LinkMode::Wifi
    }

    fn write(&mut self, cmd: &str) -> Result<()> {
        let mut stream = self.connect()?;
        stream.write_all(cmd.as_bytes())?;
        Ok(())
    }

    fn get(&mut self, cmd: &str) -> Result<String> {
        let mut stream = self.connect()?;
        stream.write_all(cmd.as_bytes())?;
        std::thread::sleep(SETTLE_DELAY);
        let mut buf = [0_u8; 64];
        let len = stream.read(&mut buf)?;
        Ok(strip_reply(&buf[..len]))
    }
}

/// Tries serial link first, then WiFi bridge
pub fn probe_transports(serial_device: &str, tcp_address: &str) -> Option<Box<dyn Transport>> {
    let serial_res = SerialTransport::open(serial_device, SERIAL_BAUD_RATE)
        .and_then(|mut transport| {
            probe(&mut transport)?;
            Ok(transport)
        });
    match serial_res {
        Ok(transport) => return Some(Box::new(transport)),
        Err(err) => log::info!("No Nexus on {}: {}", serial_device, err),
    }

    let tcp_res = TcpTransport::new(tcp_address)
        .and_then(|mut transport| {
            probe(&mut transport)?;
            Ok(transport)
        });
    match tcp_res {
        Ok(transport) => Some(Box::new(transport)),
        Err(err) => {
            log::info!("No Nexus at {}: {}", tcp_address, err);
            None
        }
    }
}

///////////////////////////////////////////////////////////////////////////////

/// In-process stand-in for mount. Accepts every position,
/// reports 2-star alignment after first sync.
pub struct SimulatedMount {
    ra:     String,
    dec:    String,
    target: (String, String),
    synced: bool,
}

impl SimulatedMount {
    pub fn new() -> Self {
        Self {
            ra:     "16:41:42".to_string(),
            dec:    "+36*27:41".to_string(),
            target: ("00:00:00".to_string(), "+00*00:00".to_string()),
            synced: false,
        }
    }
}

impl Transport for SimulatedMount {
    fn link_mode(&self) -> LinkMode {
        LinkMode::Simulated
    }

    fn write(&mut self, cmd: &str) -> Result<()> {
        self.get(cmd).map(|_| ())
    }

    fn get(&mut self, cmd: &str) -> Result<String> {
        let body = cmd.trim_start_matches(':').trim_end_matches('#');
        let now = chrono::Utc::now();
        let reply = match body {
            "P"  => "HIGH PRECISION".to_string(),
            "U"  => String::new(),
            "Gt" => "+52*30".to_string(),
            "Gg" => "+000*10".to_string(),
            "GL" => format!("{:02}:{:02}:{:02}", now.hour(), now.minute(), now.second()),
            "GC" => format!("{:02}/{:02}/{:02}", now.month(), now.day(), now.year() % 100),
            "GG" => "+00".to_string(),
            "GR" => self.ra.clone(),
            "GD" => self.dec.clone(),
            "Gr" => self.target.0.clone(),
            "Gd" => self.target.1.clone(),
            "GW" => if self.synced { "AT2" } else { "AT0" }.to_string(),
            "CM" => {
                self.synced = true;
                self.ra = self.target.0.clone();
                self.dec = self.target.1.clone();
                "Coordinates matched".to_string()
            }
            "MS" => {
                self.ra = self.target.0.clone();
                self.dec = self.target.1.clone();
                "0".to_string()
            }
            _ if body.starts_with("Sr") => {
                self.target.0 = body[2..].to_string();
                "1".to_string()
            }
            _ if body.starts_with("Sd") => {
                self.target.1 = body[2..].to_string();
                "1".to_string()
            }
            _ => return Err(Error::MalformedReply(cmd.to_string(), String::new())),
        };
        Ok(reply)
    }
}

///////////////////////////////////////////////////////////////////////////////

/// Replies with canned text and records every command sent
#[cfg(test)]
pub struct ScriptedTransport {
    pub replies: std::collections::HashMap<String, String>,
    pub sent:    std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

#[cfg(test)]
impl ScriptedTransport {
    pub fn new(replies: &[(&str, &str)]) -> Self {
        Self {
            replies: replies.iter().map(|(c, r)| (c.to_string(), r.to_string())).collect(),
            sent: Default::default(),
        }
    }
}

#[cfg(test)]
impl Transport for ScriptedTransport {
    fn link_mode(&self) -> LinkMode {
        LinkMode::Usb
    }

    fn write(&mut self, cmd: &str) -> Result<()> {
        self.sent.lock().unwrap().push(cmd.to_string());
        Ok(())
    }

    fn get(&mut self, cmd: &str) -> Result<String> {
        self.sent.lock().unwrap().push(cmd.to_string());
        let reply = self.replies.get(cmd)
            .or_else(|| self.replies.get(cmd.get(..3).unwrap_or(cmd)))
            .ok_or_else(|| Error::IO(std::io::ErrorKind::TimedOut.into()))?;
        Ok(reply.clone())
    }
}

#[test]
fn test_probe_switches_to_high_precision() {
    let mut transport = ScriptedTransport::new(&[(":P#", "LOW  PRECISION")]);
    probe(&mut transport).unwrap();
    assert_eq!(*transport.sent.lock().unwrap(), [":P#", ":U#", ":P#"]);

    let mut transport = ScriptedTransport::new(&[(":P#", "HIGH PRECISION")]);
    probe(&mut transport).unwrap();
    assert_eq!(*transport.sent.lock().unwrap(), [":P#", ":P#"]);

    let mut transport = ScriptedTransport::new(&[]);
    assert!(probe(&mut transport).is_err());
}

#[test]
fn test_strip_reply() {
    assert_eq!(strip_reply(b"AT2#"), "AT2");
    assert_eq!(strip_reply(b"16:41:42#\r\n"), "16:41:42");
    assert_eq!(strip_reply(b""), "");

    let dec = strip_reply(b"+36\xDF27:41#");
    assert_eq!(dec, "+36*27:41");
    let value = crate::sky_math::sexagesimal::sexagesimal_to_value(&dec).unwrap();
    assert!(f64::abs(value - (36.0 + 27.0 / 60.0 + 41.0 / 3600.0)) < 1e-9);
}

#[test]
fn test_simulated_mount_sync() {
    let mut mount = SimulatedMount::new();
    assert_eq!(mount.get(":GW#").unwrap(), "AT0");
    assert_eq!(mount.get(":Sr10:00:00#").unwrap(), "1");
    assert_eq!(mount.get(":Sd+20*00:00#").unwrap(), "1");
    mount.get(":CM#").unwrap();
    assert_eq!(mount.get(":GR#").unwrap(), "10:00:00");
    assert_eq!(mount.get(":GD#").unwrap(), "+20*00:00");
    assert_eq!(mount.get(":GW#").unwrap(), "AT2");
}
