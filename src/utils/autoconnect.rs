//! Auto-connect with a bounded retry budget
//!
//! Resolves the receiver port (fixed or auto-detected), opens it, and retries
//! with a fixed delay until the attempt ceiling is reached. Cancellation is
//! checked at every attempt boundary and during the delay.

use crate::core::discovery::{candidate_ports, DiscoveryConfig, PortDiscovery};
use crate::core::state_machine::{CaptureState, CaptureStateMachine};
use crate::core::transport::{LineSource, PortOpener, TransportError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Granularity of cancellable sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Auto-connect configuration
#[derive(Debug, Clone)]
pub struct AutoConnectConfig {
    /// Delay between connect attempts
    pub delay: Duration,
    /// Maximum connect attempts (at least one is always made)
    pub max_attempts: u32,
}

impl Default for AutoConnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

/// How the receiver port is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSelection {
    /// Use this port without probing
    Fixed(String),
    /// Probe candidates; `None` enumerates the platform candidates per attempt
    AutoDetect(Option<Vec<String>>),
}

/// What to connect to
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub selection: PortSelection,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub probe_window: Duration,
}

/// An open receiver connection
pub struct Connection {
    /// Port the source was opened on
    pub port: String,
    pub source: Box<dyn LineSource>,
}

/// Connect failures
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Attempt ceiling reached
    #[error("Giving up after {attempts} connect attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: TransportError,
    },

    /// Cancelled before a connection was made
    #[error("Connect cancelled")]
    Cancelled,
}

/// Sleep for `duration` unless cancelled first. Returns `true` if cancelled.
pub fn sleep_cancellable(cancel: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

/// Resolve and open the receiver once
pub fn connect_once(
    opener: &dyn PortOpener,
    target: &ConnectTarget,
    cancel: &CancellationToken,
) -> Result<Connection, TransportError> {
    let port = match &target.selection {
        PortSelection::Fixed(port) => port.clone(),
        PortSelection::AutoDetect(candidates) => {
            let candidates = candidates.clone().unwrap_or_else(candidate_ports);
            let discovery = PortDiscovery::new(
                opener,
                DiscoveryConfig {
                    baud_rate: target.baud_rate,
                    read_timeout: target.read_timeout,
                    probe_window: target.probe_window,
                },
            );
            discovery.discover(&candidates, cancel)?
        }
    };

    let source = opener.open(&port, target.baud_rate, target.read_timeout)?;
    Ok(Connection { port, source })
}

/// Record a lifecycle transition; a rejected one leaves the state as it was
fn enter(machine: &mut CaptureStateMachine, state: CaptureState, reason: &str) {
    if let Err(e) = machine.transition(state, Some(reason)) {
        debug!("{}", e);
    }
}

/// Connect with retries, recording each attempt on the state machine.
///
/// On success the machine is left in `Capturing`; on failure in
/// `Disconnected`.
pub fn connect_with_retry(
    opener: &dyn PortOpener,
    target: &ConnectTarget,
    config: &AutoConnectConfig,
    machine: &mut CaptureStateMachine,
    cancel: &CancellationToken,
) -> Result<Connection, ConnectError> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }

        attempt += 1;
        enter(machine, CaptureState::Connecting, "connect attempt");
        info!("Connecting to GPS receiver (attempt {}/{})", attempt, max_attempts);

        match connect_once(opener, target, cancel) {
            Ok(connection) => {
                enter(machine, CaptureState::Capturing, "connected");
                info!("Connected: {}", connection.source.describe());
                return Ok(connection);
            }
            Err(TransportError::Cancelled) => {
                enter(machine, CaptureState::Disconnected, "cancelled");
                return Err(ConnectError::Cancelled);
            }
            Err(e) => {
                enter(machine, CaptureState::Disconnected, "connect failed");
                warn!("Connect attempt {} failed: {}", attempt, e);

                if attempt >= max_attempts {
                    return Err(ConnectError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }

        if sleep_cancellable(cancel, config.delay) {
            return Err(ConnectError::Cancelled);
        }
    }
}
