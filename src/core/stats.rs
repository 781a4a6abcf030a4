//! Observability counters
//!
//! Atomic counters shared between the capture thread, the filter task and
//! each sink worker. Readers take a plain [`serde::Serialize`] snapshot.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Capture loop counters
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub lines_read: AtomicU64,
    pub sentences_decoded: AtomicU64,
    pub sentences_rejected: AtomicU64,
    pub read_errors: AtomicU64,
    pub snapshots_emitted: AtomicU64,
    /// Snapshots dropped because the handoff channel was full
    pub handoff_dropped: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureCounts {
    pub lines_read: u64,
    pub sentences_decoded: u64,
    pub sentences_rejected: u64,
    pub read_errors: u64,
    pub snapshots_emitted: u64,
    pub handoff_dropped: u64,
}

impl CaptureStats {
    /// Take a copy of the counters
    pub fn counts(&self) -> CaptureCounts {
        CaptureCounts {
            lines_read: load(&self.lines_read),
            sentences_decoded: load(&self.sentences_decoded),
            sentences_rejected: load(&self.sentences_rejected),
            read_errors: load(&self.read_errors),
            snapshots_emitted: load(&self.snapshots_emitted),
            handoff_dropped: load(&self.handoff_dropped),
        }
    }
}

/// Quality gate and movement filter counters
#[derive(Debug, Default)]
pub struct FilterStats {
    /// Passed the quality gate
    pub valid: AtomicU64,
    /// Rejected by the quality gate
    pub invalid: AtomicU64,
    /// Suppressed by the movement filter
    pub stationary: AtomicU64,
    /// Handed to the dispatch hub
    pub dispatched: AtomicU64,
}

/// Point-in-time copy of [`FilterStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterCounts {
    pub valid: u64,
    pub invalid: u64,
    pub stationary: u64,
    pub dispatched: u64,
}

impl FilterStats {
    /// Take a copy of the counters
    pub fn counts(&self) -> FilterCounts {
        FilterCounts {
            valid: load(&self.valid),
            invalid: load(&self.invalid),
            stationary: load(&self.stationary),
            dispatched: load(&self.dispatched),
        }
    }
}

/// Per-sink delivery counters
#[derive(Debug, Default)]
pub struct SinkStats {
    pub enqueued: AtomicU64,
    pub delivered_records: AtomicU64,
    pub delivered_batches: AtomicU64,
    pub failed_batches: AtomicU64,
    pub requeued_records: AtomicU64,
    pub dropped_records: AtomicU64,
    /// Oldest records evicted from a full queue
    pub overflow_dropped: AtomicU64,
    /// Individual `deliver_batch` calls, retries included
    pub delivery_attempts: AtomicU64,
    pub flushes: AtomicU64,
}

/// Point-in-time copy of [`SinkStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkCounts {
    pub enqueued: u64,
    pub delivered_records: u64,
    pub delivered_batches: u64,
    pub failed_batches: u64,
    pub requeued_records: u64,
    pub dropped_records: u64,
    pub overflow_dropped: u64,
    pub delivery_attempts: u64,
    pub flushes: u64,
}

impl SinkStats {
    /// Take a copy of the counters
    pub fn counts(&self) -> SinkCounts {
        SinkCounts {
            enqueued: load(&self.enqueued),
            delivered_records: load(&self.delivered_records),
            delivered_batches: load(&self.delivered_batches),
            failed_batches: load(&self.failed_batches),
            requeued_records: load(&self.requeued_records),
            dropped_records: load(&self.dropped_records),
            overflow_dropped: load(&self.overflow_dropped),
            delivery_attempts: load(&self.delivery_attempts),
            flushes: load(&self.flushes),
        }
    }
}

/// Increment a counter by one
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Increment a counter by `n`
pub(crate) fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}
