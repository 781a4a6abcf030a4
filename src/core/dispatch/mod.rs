//! Dispatch hub
//!
//! Fans each accepted snapshot out to one independent pipeline per enabled
//! sink. Pipelines never share a queue, a flush gate or a failure; a slow or
//! broken sink only ever delays itself.

mod queue;
mod worker;

pub use queue::{PushOutcome, SinkQueue};
pub use worker::{FlushOutcome, SinkPipeline, SinkSettings};

use super::position::Snapshot;
use super::sink::{Sink, SinkKind};
use super::stats::SinkCounts;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of [`DispatchHub::shutdown`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every queue drained within the grace period
    pub drained: bool,
    /// Records still queued when the grace period ran out, per sink
    pub lost: Vec<(SinkKind, usize)>,
}

impl ShutdownReport {
    pub fn lost_records(&self) -> usize {
        self.lost.iter().map(|(_, n)| n).sum()
    }
}

/// Owns one [`SinkPipeline`] per enabled sink
pub struct DispatchHub {
    pipelines: Vec<Arc<SinkPipeline>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    shutdown_grace: Duration,
}

impl DispatchHub {
    /// Create an empty hub
    pub fn new(shutdown_grace: Duration) -> Self {
        Self {
            pipelines: Vec::new(),
            workers: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            shutdown_grace,
        }
    }

    /// Register a sink; a second sink of the same kind replaces the first
    pub fn add_sink(&mut self, sink: Arc<dyn Sink>, settings: SinkSettings) {
        let kind = sink.kind();
        self.pipelines.retain(|p| p.kind() != kind);
        self.pipelines
            .push(Arc::new(SinkPipeline::new(sink, settings)));
        self.pipelines.sort_by_key(|p| p.kind());
        debug!("Registered {} sink", kind);
    }

    /// Sinks receiving snapshots
    pub fn enabled_sinks(&self) -> Vec<SinkKind> {
        self.pipelines.iter().map(|p| p.kind()).collect()
    }

    pub fn pipeline(&self, kind: SinkKind) -> Option<&Arc<SinkPipeline>> {
        self.pipelines.iter().find(|p| p.kind() == kind)
    }

    /// Spawn one worker per sink. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for pipeline in &self.pipelines {
            workers.push(tokio::spawn(
                Arc::clone(pipeline).run(self.cancel.child_token()),
            ));
        }
        info!(
            "Dispatch started for {} sinks: {:?}",
            self.pipelines.len(),
            self.enabled_sinks()
        );
    }

    /// Enqueue a snapshot for every sink; returns the number of sinks
    pub fn dispatch(&self, snapshot: &Snapshot) -> usize {
        for pipeline in &self.pipelines {
            pipeline.enqueue(snapshot);
        }
        self.pipelines.len()
    }

    /// Flush every sink once, concurrently
    pub async fn flush_all(&self) -> Vec<(SinkKind, FlushOutcome)> {
        join_all(
            self.pipelines
                .iter()
                .map(|p| async move { (p.kind(), p.flush().await) }),
        )
        .await
    }

    /// Per-sink counters
    pub fn stats(&self) -> Vec<(SinkKind, SinkCounts)> {
        self.pipelines
            .iter()
            .map(|p| (p.kind(), p.stats()))
            .collect()
    }

    /// Stop the workers, then flush until every queue is empty or the grace
    /// period elapses. Whatever is still queued afterwards is discarded,
    /// including a batch whose delivery the grace period cut short.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.cancel.cancel();
        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Sink worker failed: {}", e);
            }
        }

        let drain = join_all(self.pipelines.iter().map(|p| drain_pipeline(p)));
        let drained = tokio::time::timeout(self.shutdown_grace, drain)
            .await
            .is_ok();
        if !drained {
            warn!(
                "Shutdown grace period of {:?} elapsed with records pending",
                self.shutdown_grace
            );
        }

        let mut lost = Vec::new();
        for pipeline in &self.pipelines {
            let n = pipeline.discard_pending();
            if n > 0 {
                error!("{} sink lost {} undelivered records", pipeline.kind(), n);
                lost.push((pipeline.kind(), n));
            }
        }

        ShutdownReport {
            drained: drained && lost.is_empty(),
            lost,
        }
    }
}

async fn drain_pipeline(pipeline: &SinkPipeline) {
    while pipeline.pending() > 0 {
        match pipeline.flush().await {
            FlushOutcome::Busy => tokio::time::sleep(Duration::from_millis(10)).await,
            FlushOutcome::Idle => break,
            FlushOutcome::Flushed { .. } => tokio::task::yield_now().await,
        }
    }
}
