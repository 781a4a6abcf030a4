//! GPS receiver port discovery
//!
//! Enumerates candidate serial devices and probes them one at a time for
//! NMEA traffic from a GNSS talker.

use super::protocol::GPS_TALKER_PREFIXES;
use super::transport::{list_ports, PortOpener, TransportError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Probe settings
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Baud rate used while probing
    pub baud_rate: u32,
    /// Read timeout for each probe read
    pub read_timeout: Duration,
    /// How long a candidate has to produce a GPS line
    pub probe_window: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            baud_rate: 4800,
            read_timeout: Duration::from_millis(1000),
            probe_window: Duration::from_secs(5),
        }
    }
}

/// Whether a raw line comes from a GNSS talker
pub fn is_gps_line(line: &str) -> bool {
    let line = line.trim_start();
    GPS_TALKER_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// Candidate device paths for this platform, OS-enumerated ports first.
///
/// Nothing is opened here.
pub fn candidate_ports() -> Vec<String> {
    let mut candidates: Vec<String> = list_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default();

    for port in platform_defaults() {
        if !candidates.contains(&port) {
            candidates.push(port);
        }
    }

    candidates
}

#[cfg(target_os = "linux")]
fn platform_defaults() -> Vec<String> {
    let mut ports = Vec::new();
    for n in 0..4 {
        ports.push(format!("/dev/ttyUSB{n}"));
        ports.push(format!("/dev/ttyACM{n}"));
    }
    ports.push("/dev/ttyAMA0".to_string());
    ports.push("/dev/serial0".to_string());
    for n in 0..4 {
        ports.push(format!("/dev/ttyS{n}"));
    }
    ports
        .into_iter()
        .filter(|p| std::path::Path::new(p).exists())
        .collect()
}

#[cfg(windows)]
fn platform_defaults() -> Vec<String> {
    (1..=20).map(|n| format!("COM{n}")).collect()
}

#[cfg(not(any(target_os = "linux", windows)))]
fn platform_defaults() -> Vec<String> {
    Vec::new()
}

/// Sequential prober over a set of candidates
pub struct PortDiscovery<'a> {
    opener: &'a dyn PortOpener,
    config: DiscoveryConfig,
}

impl<'a> PortDiscovery<'a> {
    /// Create a prober using `opener` to reach devices
    pub fn new(opener: &'a dyn PortOpener, config: DiscoveryConfig) -> Self {
        Self { opener, config }
    }

    /// Return the first candidate that produces a GPS line within the window
    pub fn discover(
        &self,
        candidates: &[String],
        cancel: &CancellationToken,
    ) -> Result<String, TransportError> {
        for port in candidates {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            debug!("Probing {} @ {} baud", port, self.config.baud_rate);
            if self.probe(port, cancel) {
                info!("GPS receiver detected on {}", port);
                return Ok(port.clone());
            }
        }
        Err(TransportError::NoReceiverDetected)
    }

    /// Probe a single port; the probe connection is closed on return
    pub fn probe(&self, port: &str, cancel: &CancellationToken) -> bool {
        let mut source = match self
            .opener
            .open(port, self.config.baud_rate, self.config.read_timeout)
        {
            Ok(source) => source,
            Err(e) => {
                debug!("Cannot open {}: {}", port, e);
                return false;
            }
        };

        let deadline = Instant::now() + self.config.probe_window;
        while Instant::now() < deadline && !cancel.is_cancelled() {
            match source.read_line() {
                Ok(line) if is_gps_line(&line) => return true,
                Ok(_) => {}
                Err(e) if e.is_timeout() => {}
                Err(e) => {
                    debug!("Probe of {} ended: {}", port, e);
                    return false;
                }
            }
        }
        false
    }
}
