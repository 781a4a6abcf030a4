//! Serial port transport implementation

use super::{LineSource, PortOpener, TransportError};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{BufRead, BufReader, ErrorKind};
use std::time::Duration;

/// Largest line kept while waiting for a terminator
const MAX_LINE_LEN: usize = 1024;

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout for one blocking read
    pub read_timeout: Duration,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            read_timeout: Duration::from_millis(1000),
        }
    }

    /// Set read timeout
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Open the port as a line source (8N1, no flow control)
    pub fn open(&self) -> Result<SerialLineSource, TransportError> {
        let port = serialport::new(&self.port, self.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(self.port.clone()),
                serialport::ErrorKind::Io(io_kind) => match io_kind {
                    ErrorKind::PermissionDenied => {
                        TransportError::PermissionDenied(self.port.clone())
                    }
                    ErrorKind::NotFound => TransportError::PortNotFound(self.port.clone()),
                    _ => TransportError::ConnectionFailed(e.to_string()),
                },
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        Ok(SerialLineSource::new(port, self.clone()))
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 4800)
    }
}

/// Line reader over an open serial port.
///
/// Bytes read before a timeout are kept in `pending` so a sentence split
/// across two reads is reassembled instead of lost.
pub struct SerialLineSource {
    config: SerialConfig,
    reader: BufReader<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialLineSource {
    fn new(port: Box<dyn SerialPort>, config: SerialConfig) -> Self {
        Self {
            config,
            reader: BufReader::new(port),
            pending: Vec::with_capacity(128),
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.pending.clear();
        line
    }
}

impl LineSource for SerialLineSource {
    fn read_line(&mut self) -> Result<String, TransportError> {
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(0) => Err(TransportError::Timeout),
            Ok(_) if self.pending.ends_with(b"\n") => Ok(self.take_line()),
            Ok(_) => Err(TransportError::Timeout),
            Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                if self.pending.len() > MAX_LINE_LEN {
                    // Line noise without terminators; drop it
                    self.pending.clear();
                }
                Err(TransportError::Timeout)
            }
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::IoError(e)),
        }
    }

    fn describe(&self) -> String {
        format!(
            "{} @ {} baud (8N1)",
            self.config.port, self.config.baud_rate
        )
    }
}

/// Opens real serial devices
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Box<dyn LineSource>, TransportError> {
        let source = SerialConfig::new(port, baud_rate)
            .read_timeout(read_timeout)
            .open()?;
        Ok(Box::new(source))
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}
