//! Per-sink delivery pipeline
//!
//! Owns one sink's queue, its flush gate and its background worker. The
//! worker wakes on a size trigger or on the flush timer; each wake drains
//! the queue batch by batch until it is empty or a batch fails.

use super::queue::SinkQueue;
use crate::core::position::Snapshot;
use crate::core::retry::{retry_with_backoff, RetryPolicy};
use crate::core::sink::{FailurePolicy, Sink, SinkError, SinkKind, SinkRecord};
use crate::core::stats::{add, bump, SinkCounts, SinkStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Batch popped for delivery.
///
/// Dropping it unsettled (the flush future was cancelled mid-delivery) puts
/// the records back at the queue head.
struct InFlight<'a> {
    pipeline: &'a SinkPipeline,
    batch: Vec<SinkRecord>,
}

impl InFlight<'_> {
    fn take(&mut self) -> Vec<SinkRecord> {
        std::mem::take(&mut self.batch)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let count = self.batch.len();
        let evicted = self.pipeline.queue.requeue_front(self.take());
        add(&self.pipeline.stats.overflow_dropped, evicted);
        debug!(
            "{} flush interrupted, returned {} records to the queue",
            self.pipeline.kind(),
            count
        );
    }
}

/// Batching and retry settings for one sink
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSettings {
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub failure_policy: FailurePolicy,
    pub flush_interval: Duration,
    /// 0 means unbounded
    pub max_queue_len: usize,
}

impl SinkSettings {
    /// Defaults for `kind`
    pub fn for_kind(kind: SinkKind) -> Self {
        Self {
            batch_size: 10,
            retry: RetryPolicy::default(),
            failure_policy: kind.default_failure_policy(),
            flush_interval: Duration::from_secs(5),
            max_queue_len: 10_000,
        }
    }
}

/// Result of a flush request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush holds the gate; nothing was sent
    Busy,
    /// Queue was empty
    Idle,
    /// Batches were extracted
    Flushed {
        delivered: usize,
        /// A batch exhausted its retries and the failure policy was applied
        failed: bool,
    },
}

/// Queue, flush gate and worker for one sink
pub struct SinkPipeline {
    sink: Arc<dyn Sink>,
    settings: SinkSettings,
    queue: SinkQueue,
    gate: Mutex<()>,
    wake: Notify,
    stats: SinkStats,
}

impl SinkPipeline {
    pub fn new(sink: Arc<dyn Sink>, settings: SinkSettings) -> Self {
        let queue = SinkQueue::new(settings.max_queue_len);
        Self {
            sink,
            settings: SinkSettings {
                batch_size: settings.batch_size.max(1),
                ..settings
            },
            queue,
            gate: Mutex::new(()),
            wake: Notify::new(),
            stats: SinkStats::default(),
        }
    }

    pub fn kind(&self) -> SinkKind {
        self.sink.kind()
    }

    pub fn settings(&self) -> &SinkSettings {
        &self.settings
    }

    /// Records waiting for delivery
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> SinkCounts {
        self.stats.counts()
    }

    /// Append a snapshot; wakes the worker once a full batch is waiting
    pub fn enqueue(&self, snapshot: &Snapshot) {
        let outcome = self
            .queue
            .push(SinkRecord::new(self.kind(), snapshot.clone()));
        bump(&self.stats.enqueued);

        if outcome.evicted > 0 {
            add(&self.stats.overflow_dropped, outcome.evicted);
            warn!(
                "{} queue full ({}), dropped {} oldest records",
                self.kind(),
                self.queue.max_len(),
                outcome.evicted
            );
        }
        if outcome.len >= self.settings.batch_size {
            self.wake.notify_one();
        }
    }

    /// Drain the queue batch by batch.
    ///
    /// Returns [`FlushOutcome::Busy`] without sending anything if another
    /// flush is in flight for this sink.
    pub async fn flush(&self) -> FlushOutcome {
        let Ok(_gate) = self.gate.try_lock() else {
            debug!("{} flush already in progress", self.kind());
            return FlushOutcome::Busy;
        };
        if self.queue.is_empty() {
            return FlushOutcome::Idle;
        }
        bump(&self.stats.flushes);

        let mut delivered = 0;
        loop {
            let mut in_flight = InFlight {
                pipeline: self,
                batch: self.queue.pop_batch(self.settings.batch_size),
            };
            if in_flight.batch.is_empty() {
                break;
            }

            let result = self.deliver(&in_flight.batch).await;
            let batch = in_flight.take();
            match result {
                Ok(()) => {
                    delivered += batch.len();
                    add(&self.stats.delivered_records, batch.len());
                    bump(&self.stats.delivered_batches);
                    debug!("{} delivered batch of {}", self.kind(), batch.len());
                }
                Err(e) => {
                    self.apply_failure_policy(batch, &e);
                    return FlushOutcome::Flushed {
                        delivered,
                        failed: true,
                    };
                }
            }
        }

        FlushOutcome::Flushed {
            delivered,
            failed: false,
        }
    }

    async fn deliver(&self, batch: &[SinkRecord]) -> Result<(), SinkError> {
        let sink = &self.sink;
        let stats = &self.stats;
        let kind = self.kind();

        retry_with_backoff(&self.settings.retry, move |attempt| {
            bump(&stats.delivery_attempts);
            debug!("{} delivery attempt {} ({} records)", kind, attempt, batch.len());
            sink.deliver_batch(batch)
        })
        .await
        .map_err(|e| {
            warn!(
                "{} batch of {} failed after {} attempts: {}",
                kind,
                batch.len(),
                e.attempts,
                e.last_error
            );
            e.last_error
        })
    }

    fn apply_failure_policy(&self, batch: Vec<SinkRecord>, error: &SinkError) {
        bump(&self.stats.failed_batches);
        let count = batch.len();

        match self.settings.failure_policy {
            FailurePolicy::Requeue => {
                let evicted = self.queue.requeue_front(batch);
                add(&self.stats.requeued_records, count);
                add(&self.stats.overflow_dropped, evicted);
                info!("{} requeued {} records after: {}", self.kind(), count, error);
            }
            FailurePolicy::Drop => {
                add(&self.stats.dropped_records, count);
                warn!("{} dropped {} records after: {}", self.kind(), count, error);
            }
        }
    }

    /// Discard everything still queued, returning how many records were lost
    pub fn discard_pending(&self) -> usize {
        let lost = self.queue.drain_all().len();
        add(&self.stats.dropped_records, lost);
        lost
    }

    /// Worker loop: flush on size trigger or timer until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = ticker.tick() => {}
            }
            self.flush().await;
        }
        debug!("{} worker stopped", self.kind());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatch::testing::{snapshot, RecordingSink};
    use tokio::time::Instant;

    fn settings(batch_size: usize, policy: FailurePolicy) -> SinkSettings {
        SinkSettings {
            batch_size,
            retry: RetryPolicy::new(3, Duration::from_millis(100)),
            failure_policy: policy,
            flush_interval: Duration::from_secs(5),
            max_queue_len: 0,
        }
    }

    #[tokio::test]
    async fn test_flush_drains_in_batches() {
        let sink = Arc::new(RecordingSink::new(SinkKind::File));
        let pipeline = SinkPipeline::new(sink.clone(), settings(2, FailurePolicy::Requeue));
        for i in 0..5 {
            pipeline.enqueue(&snapshot(i as f64));
        }

        let outcome = pipeline.flush().await;
        assert_eq!(
            outcome,
            FlushOutcome::Flushed {
                delivered: 5,
                failed: false
            }
        );
        assert_eq!(sink.batch_sizes(), vec![2, 2, 1]);
        assert_eq!(pipeline.flush().await, FlushOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_batch_retries_with_backoff_then_drops() {
        let sink = Arc::new(RecordingSink::failing(SinkKind::Api, u32::MAX));
        let pipeline = SinkPipeline::new(sink.clone(), settings(2, FailurePolicy::Drop));
        pipeline.enqueue(&snapshot(1.0));
        pipeline.enqueue(&snapshot(2.0));

        let outcome = pipeline.flush().await;
        assert_eq!(
            outcome,
            FlushOutcome::Flushed {
                delivered: 0,
                failed: true
            }
        );

        let attempts = sink.attempt_times();
        assert_eq!(attempts.len(), 3);
        let first_gap = attempts[1] - attempts[0];
        let second_gap = attempts[2] - attempts[1];
        assert!(second_gap > first_gap);

        let counts = pipeline.stats();
        assert_eq!(counts.delivery_attempts, 3);
        assert_eq!(counts.failed_batches, 1);
        assert_eq!(counts.dropped_records, 2);
        assert_eq!(pipeline.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_policy_keeps_batch() {
        let sink = Arc::new(RecordingSink::failing(SinkKind::Database, 3));
        let pipeline = SinkPipeline::new(sink.clone(), settings(2, FailurePolicy::Requeue));
        pipeline.enqueue(&snapshot(1.0));
        pipeline.enqueue(&snapshot(2.0));

        pipeline.flush().await;
        assert_eq!(pipeline.pending(), 2);
        assert_eq!(pipeline.stats().requeued_records, 2);

        // Failures are used up; the requeued batch goes out in order
        pipeline.flush().await;
        assert_eq!(pipeline.pending(), 0);
        assert_eq!(sink.delivered_latitudes(), vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_concurrent_flush_reports_busy() {
        let sink = Arc::new(RecordingSink::blocking(SinkKind::ObjectStore));
        let pipeline = Arc::new(SinkPipeline::new(
            sink.clone(),
            settings(1, FailurePolicy::Drop),
        ));
        pipeline.enqueue(&snapshot(1.0));

        let first = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.flush().await }
        });
        sink.wait_entered().await;

        pipeline.enqueue(&snapshot(2.0));
        assert_eq!(pipeline.flush().await, FlushOutcome::Busy);

        sink.release();
        let outcome = first.await.unwrap();
        assert_eq!(
            outcome,
            FlushOutcome::Flushed {
                delivered: 2,
                failed: false
            }
        );
        assert_eq!(sink.max_concurrent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_flush_returns_batch_to_queue() {
        let sink = Arc::new(RecordingSink::blocking(SinkKind::Api));
        let pipeline = SinkPipeline::new(sink.clone(), settings(2, FailurePolicy::Drop));
        pipeline.enqueue(&snapshot(1.0));
        pipeline.enqueue(&snapshot(2.0));
        pipeline.enqueue(&snapshot(3.0));

        let cut = tokio::time::timeout(Duration::from_secs(1), pipeline.flush()).await;
        assert!(cut.is_err());
        assert_eq!(pipeline.pending(), 3);
        assert_eq!(pipeline.stats().dropped_records, 0);

        sink.release();
        pipeline.flush().await;
        assert_eq!(sink.delivered_latitudes(), vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_flushes_on_batch_size() {
        let sink = Arc::new(RecordingSink::new(SinkKind::File));
        let mut slow_timer = settings(2, FailurePolicy::Requeue);
        slow_timer.flush_interval = Duration::from_secs(3600);
        let pipeline = Arc::new(SinkPipeline::new(sink.clone(), slow_timer));
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(Arc::clone(&pipeline).run(cancel.clone()));

        pipeline.enqueue(&snapshot(1.0));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sink.batch_sizes().is_empty());

        pipeline.enqueue(&snapshot(2.0));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sink.batch_sizes(), vec![2]);

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_flushes_on_timer() {
        let sink = Arc::new(RecordingSink::new(SinkKind::Api));
        let pipeline = Arc::new(SinkPipeline::new(sink.clone(), settings(10, FailurePolicy::Drop)));
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(Arc::clone(&pipeline).run(cancel.clone()));

        let start = Instant::now();
        pipeline.enqueue(&snapshot(1.0));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(sink.batch_sizes().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.batch_sizes(), vec![1]);
        assert!(start.elapsed() >= Duration::from_secs(5));

        cancel.cancel();
        worker.await.unwrap();
    }
}
