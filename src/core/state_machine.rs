//! Capture State Machine
//!
//! Formal lifecycle for the capture loop: `Disconnected → Connecting →
//! Capturing → Stopped`. Invalid transitions are rejected so a bug in the
//! loop shows up as an error instead of a silent state mix-up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Capture state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureState {
    /// No device handle held
    Disconnected,
    /// Resolving and opening the port
    Connecting,
    /// Reading sentences
    Capturing,
    /// Loop finished (cancelled, end of stream, or fatal error)
    Stopped,
}

impl CaptureState {
    /// Check if state holds an open device
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    /// Check if state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Capturing => "capturing",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Rejected transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: CaptureState,
    pub to: CaptureState,
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: CaptureState,
    /// New state
    pub to: CaptureState,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Reason for transition
    pub reason: Option<String>,
}

/// Capture state machine
#[derive(Debug)]
pub struct CaptureStateMachine {
    state: CaptureState,
    history: VecDeque<StateTransition>,
    max_history: usize,
    connect_attempts: u32,
    last_transition: Option<Instant>,
}

impl Default for CaptureStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureStateMachine {
    /// Create a new state machine
    pub fn new() -> Self {
        Self {
            state: CaptureState::Disconnected,
            history: VecDeque::new(),
            max_history: 64,
            connect_attempts: 0,
            last_transition: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Get state history, oldest first
    pub fn history(&self) -> impl Iterator<Item = &StateTransition> {
        self.history.iter()
    }

    /// Connect attempts since the last successful connection
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    /// Get time in current state
    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    /// Transition to a new state
    pub fn transition(
        &mut self,
        new_state: CaptureState,
        reason: Option<&str>,
    ) -> Result<(), InvalidTransition> {
        if !Self::is_valid_transition(self.state, new_state) {
            return Err(InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.history.push_back(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Utc::now(),
            reason: reason.map(String::from),
        });
        if self.history.len() > self.max_history {
            self.history.pop_front();
        }

        match new_state {
            CaptureState::Connecting => self.connect_attempts += 1,
            CaptureState::Capturing => self.connect_attempts = 0,
            _ => {}
        }

        self.state = new_state;
        self.last_transition = Some(Instant::now());
        Ok(())
    }

    fn is_valid_transition(from: CaptureState, to: CaptureState) -> bool {
        use CaptureState::*;

        matches!(
            (from, to),
            (Disconnected, Connecting)
                | (Disconnected, Stopped)
                | (Connecting, Capturing)
                | (Connecting, Disconnected)
                | (Connecting, Stopped)
                | (Capturing, Disconnected)
                | (Capturing, Stopped)
        )
    }
}
