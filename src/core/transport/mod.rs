//! Transport layer for NMEA line sources
//!
//! Supports:
//! - Serial ports (RS-232, USB-Serial GPS receivers)
//! - Recorded NMEA logs replayed from disk (see [`crate::core::replay`])

mod serial;

pub use serial::{list_ports, SerialConfig, SerialLineSource, SerialOpener};

use std::time::Duration;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Read timed out without a complete line
    #[error("Read timeout")]
    Timeout,

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No port carrying GPS traffic was found
    #[error("No GPS receiver detected on any candidate port")]
    NoReceiverDetected,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,

    /// The source has no more lines (replay end of file)
    #[error("End of stream")]
    EndOfStream,

    /// Operation cancelled
    #[error("Cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether the error is a plain read timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// A blocking source of text lines.
///
/// `read_line` blocks for at most the source's read timeout and returns
/// [`TransportError::Timeout`] when no complete line arrived in that window.
/// Returned lines have their line terminator removed.
pub trait LineSource: Send {
    /// Read the next complete line
    fn read_line(&mut self) -> Result<String, TransportError>;

    /// Human readable description of the source
    fn describe(&self) -> String;
}

/// Opens line sources by port name.
///
/// This is the seam between capture logic and hardware: the serial opener
/// talks to real devices, the replay opener reads files, tests mock it.
#[cfg_attr(test, mockall::automock)]
pub trait PortOpener: Send + Sync {
    /// Open `port` at `baud_rate` with the given read timeout
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Box<dyn LineSource>, TransportError>;
}
