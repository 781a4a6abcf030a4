//! Snapshot consumer
//!
//! Receives snapshots from the capture thread, runs them through the quality
//! gate and the movement filter, and hands survivors to the dispatch hub.

use super::dispatch::DispatchHub;
use super::filter::{Movement, MovementFilter, QualityGate, Rejection};
use super::position::Snapshot;
use super::stats::{bump, FilterCounts, FilterStats};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// What happened to one snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Handed to this many sinks
    Dispatched { sinks: usize, movement: Movement },
    /// Suppressed; moved less than the threshold
    Stationary { distance_m: f64 },
    /// Failed the quality gate
    Rejected(Rejection),
}

/// Quality gate and movement filter in front of the dispatch hub
pub struct SnapshotPipeline {
    gate: QualityGate,
    movement: MovementFilter,
    hub: Arc<DispatchHub>,
    stats: Arc<FilterStats>,
}

impl SnapshotPipeline {
    pub fn new(gate: QualityGate, movement: MovementFilter, hub: Arc<DispatchHub>) -> Self {
        Self {
            gate,
            movement,
            hub,
            stats: Arc::new(FilterStats::default()),
        }
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<FilterStats> {
        Arc::clone(&self.stats)
    }

    pub fn counts(&self) -> FilterCounts {
        self.stats.counts()
    }

    /// Filter one snapshot and dispatch it if it survives
    pub fn process(&mut self, snapshot: Snapshot) -> Decision {
        if let Err(reason) = self.gate.check(&snapshot) {
            bump(&self.stats.invalid);
            debug!("Snapshot rejected: {}", reason);
            return Decision::Rejected(reason);
        }
        bump(&self.stats.valid);

        match self.movement.evaluate(&snapshot) {
            Movement::Stationary(distance_m) => {
                bump(&self.stats.stationary);
                debug!("Stationary: moved {:.1} m", distance_m);
                Decision::Stationary { distance_m }
            }
            movement => {
                let sinks = self.hub.dispatch(&snapshot);
                bump(&self.stats.dispatched);
                if let Some(position) = snapshot.format_position() {
                    debug!("Dispatched {} to {} sinks", position, sinks);
                }
                Decision::Dispatched { sinks, movement }
            }
        }
    }

    /// Consume snapshots until every sender is gone
    pub async fn run(mut self, mut snapshots: mpsc::Receiver<Snapshot>) -> FilterCounts {
        while let Some(snapshot) = snapshots.recv().await {
            self.process(snapshot);
        }
        self.counts()
    }
}
