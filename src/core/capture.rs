//! Capture loop
//!
//! Owns the receiver connection and the read-decode-accumulate-emit cycle.
//! Runs on a dedicated blocking thread; snapshots leave through a bounded
//! channel with a non-blocking send so ingestion never waits on delivery.

use super::position::{PositionState, Snapshot};
use super::protocol::decode;
use super::state_machine::{CaptureState, CaptureStateMachine};
use super::stats::{bump, CaptureCounts, CaptureStats};
use super::transport::{LineSource, PortOpener, TransportError};
use crate::utils::autoconnect::{
    connect_with_retry, sleep_cancellable, AutoConnectConfig, ConnectError, ConnectTarget,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capture loop settings
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub target: ConnectTarget,
    pub autoconnect: AutoConnectConfig,
    /// Minimum time between emitted snapshots
    pub interval: Duration,
    /// Pause after a non-timeout read error
    pub read_error_pause: Duration,
    /// Device identifier stamped on snapshots; defaults to the port name
    pub device_id: Option<String>,
}

/// Why the read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureExit {
    Cancelled,
    /// Replay source exhausted
    EndOfStream,
    /// Snapshot consumer went away
    ConsumerClosed,
}

/// Capture failures
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

/// Result of a finished capture run
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    pub exit: CaptureExit,
    pub port: String,
    pub counts: CaptureCounts,
}

/// Read-decode-accumulate-emit loop over one receiver
pub struct CaptureLoop {
    opener: Arc<dyn PortOpener>,
    settings: CaptureSettings,
    machine: CaptureStateMachine,
    position: PositionState,
    last_emit: Option<Instant>,
    stats: Arc<CaptureStats>,
    handoff: mpsc::Sender<Snapshot>,
}

impl CaptureLoop {
    /// Create a capture loop handing snapshots to `handoff`
    pub fn new(
        opener: Arc<dyn PortOpener>,
        settings: CaptureSettings,
        handoff: mpsc::Sender<Snapshot>,
        stats: Arc<CaptureStats>,
    ) -> Self {
        let device_id = settings.device_id.clone().unwrap_or_default();
        Self {
            opener,
            settings,
            machine: CaptureStateMachine::new(),
            position: PositionState::new(device_id),
            last_emit: None,
            stats,
            handoff,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> CaptureState {
        self.machine.state()
    }

    /// Accumulated position
    pub fn position(&self) -> &PositionState {
        &self.position
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Connect, then read until cancelled, end of stream, or consumer loss.
    ///
    /// Exhausting the connect ceiling is returned as an error; the loop is
    /// left in `Stopped` in every case.
    pub fn run(mut self, cancel: CancellationToken) -> Result<CaptureSummary, CaptureError> {
        let connection = match connect_with_retry(
            self.opener.as_ref(),
            &self.settings.target,
            &self.settings.autoconnect,
            &mut self.machine,
            &cancel,
        ) {
            Ok(connection) => connection,
            Err(ConnectError::Cancelled) => {
                self.stop("cancelled before connect");
                return Ok(CaptureSummary {
                    exit: CaptureExit::Cancelled,
                    port: String::new(),
                    counts: self.stats.counts(),
                });
            }
            Err(e) => {
                error!("Unable to connect to GPS receiver: {}", e);
                self.stop("connect attempts exhausted");
                return Err(e.into());
            }
        };

        if self.position.device_id.is_empty() {
            self.position.device_id = connection.port.clone();
        }

        let exit = self.read_loop(connection.source, &cancel);
        self.stop(match exit {
            CaptureExit::Cancelled => "cancelled",
            CaptureExit::EndOfStream => "end of stream",
            CaptureExit::ConsumerClosed => "consumer closed",
        });

        let counts = self.stats.counts();
        info!(
            "Capture stopped on {}: {} lines, {} decoded, {} rejected, {} snapshots",
            connection.port,
            counts.lines_read,
            counts.sentences_decoded,
            counts.sentences_rejected,
            counts.snapshots_emitted
        );

        Ok(CaptureSummary {
            exit,
            port: connection.port,
            counts,
        })
    }

    /// Consumes the source so the device handle is released on return
    fn read_loop(
        &mut self,
        mut source: Box<dyn LineSource>,
        cancel: &CancellationToken,
    ) -> CaptureExit {
        loop {
            if cancel.is_cancelled() {
                return CaptureExit::Cancelled;
            }

            match source.read_line() {
                Ok(line) => {
                    bump(&self.stats.lines_read);
                    if let Some(snapshot) = self.ingest_line(&line, Instant::now()) {
                        if !self.hand_off(snapshot) {
                            return CaptureExit::ConsumerClosed;
                        }
                    }
                }
                Err(e) if e.is_timeout() => continue,
                Err(TransportError::EndOfStream) => return CaptureExit::EndOfStream,
                Err(TransportError::Cancelled) => return CaptureExit::Cancelled,
                Err(e) => {
                    bump(&self.stats.read_errors);
                    warn!("Read error on {}: {}", source.describe(), e);
                    if sleep_cancellable(cancel, self.settings.read_error_pause) {
                        return CaptureExit::Cancelled;
                    }
                }
            }
        }
    }

    /// Fold one line into the position and return a snapshot if one is due.
    ///
    /// A snapshot is due when the capture interval has elapsed since the
    /// previous emission and both coordinates are known.
    pub fn ingest_line(&mut self, line: &str, now: Instant) -> Option<Snapshot> {
        let line = line.trim();
        if !line.starts_with('$') {
            return None;
        }

        match decode(line) {
            Some(sentence) => {
                bump(&self.stats.sentences_decoded);
                self.position.apply(&sentence, Utc::now().date_naive());
            }
            None => {
                bump(&self.stats.sentences_rejected);
                debug!("Rejected sentence: {}", line);
                return None;
            }
        }

        if !self.position.has_position() {
            return None;
        }
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.settings.interval {
                return None;
            }
        }

        self.last_emit = Some(now);
        bump(&self.stats.snapshots_emitted);
        Some(self.position.snapshot(Utc::now()))
    }

    /// Returns `false` once the consumer is gone
    fn hand_off(&self, snapshot: Snapshot) -> bool {
        match self.handoff.try_send(snapshot) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                bump(&self.stats.handoff_dropped);
                warn!("Snapshot handoff full, dropping snapshot");
                true
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Snapshot consumer closed");
                false
            }
        }
    }

    fn stop(&mut self, reason: &str) {
        if let Err(e) = self.machine.transition(CaptureState::Stopped, Some(reason)) {
            debug!("{}", e);
        }
    }
}
