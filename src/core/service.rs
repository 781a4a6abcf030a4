//! Service wiring
//!
//! Builds the sinks and the dispatch hub from configuration, starts the
//! capture thread and the snapshot consumer, and tears everything down in
//! order: capture stops, the consumer drains the handoff channel, then the
//! hub flushes within its grace period.

use super::capture::{CaptureError, CaptureLoop, CaptureSettings, CaptureSummary};
use super::dispatch::{DispatchHub, ShutdownReport};
use super::filter::{MovementFilter, QualityGate};
use super::pipeline::SnapshotPipeline;
use super::sink::{
    ApiSink, DatabaseSink, FileSink, ObjectStoreSink, Sink, SinkError, SinkKind,
};
use super::stats::{CaptureStats, FilterCounts, SinkCounts};
use super::transport::PortOpener;
use crate::config::AppConfig;
use crate::utils::autoconnect::{AutoConnectConfig, ConnectTarget, PortSelection};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Service failures
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to initialise {kind} sink: {source}")]
    Sink { kind: SinkKind, source: SinkError },

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Service task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Counters of a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub capture: CaptureSummary,
    pub filter: FilterCounts,
    pub sinks: Vec<(SinkKind, SinkCounts)>,
    pub shutdown: ShutdownReport,
}

/// Capture loop settings derived from configuration
pub fn capture_settings(config: &AppConfig) -> CaptureSettings {
    let serial = &config.serial;
    let selection = match (&serial.port, serial.auto_detect) {
        (Some(port), false) => PortSelection::Fixed(port.clone()),
        _ => PortSelection::AutoDetect(None),
    };

    CaptureSettings {
        target: ConnectTarget {
            selection,
            baud_rate: serial.baud_rate,
            read_timeout: Duration::from_millis(serial.read_timeout_ms),
            probe_window: Duration::from_secs(serial.probe_window_secs),
        },
        autoconnect: AutoConnectConfig {
            delay: Duration::from_secs(serial.connect_delay_secs),
            max_attempts: serial.connect_attempts,
        },
        interval: Duration::from_secs(config.capture.interval_secs),
        read_error_pause: Duration::from_millis(serial.read_error_pause_ms),
        device_id: serial.device_id.clone().filter(|id| !id.is_empty()),
    }
}

/// Construct the sink of `kind` from configuration
pub fn build_sink(kind: SinkKind, config: &AppConfig) -> Result<Arc<dyn Sink>, SinkError> {
    let sinks = &config.sinks;
    Ok(match kind {
        SinkKind::File => Arc::new(FileSink::new(sinks.file.target.clone())),
        SinkKind::Api => Arc::new(ApiSink::new(sinks.api.target.clone())?),
        SinkKind::ObjectStore => Arc::new(ObjectStoreSink::new(sinks.object_store.target.clone())?),
        SinkKind::Database => {
            let mut db = sinks.database.target.clone();
            db.raw_data_retention = config.dispatch.raw_data_retention;
            Arc::new(DatabaseSink::open(&db)?)
        }
    })
}

/// Dispatch hub with every enabled sink registered
pub fn build_hub(config: &AppConfig) -> Result<DispatchHub, ServiceError> {
    let mut hub = DispatchHub::new(Duration::from_secs(config.dispatch.shutdown_grace_secs));
    for kind in config.sinks.enabled() {
        let sink = build_sink(kind, config).map_err(|source| ServiceError::Sink { kind, source })?;
        hub.add_sink(sink, config.sinks.common(kind).to_settings(kind));
    }
    if hub.enabled_sinks().is_empty() {
        warn!("No sinks enabled; snapshots will be filtered and discarded");
    }
    Ok(hub)
}

/// One capture-and-dispatch run
pub struct Service {
    config: AppConfig,
    opener: Arc<dyn PortOpener>,
    hub: DispatchHub,
}

impl Service {
    /// Build the service and its sinks from configuration
    pub fn new(config: AppConfig, opener: Arc<dyn PortOpener>) -> Result<Self, ServiceError> {
        let hub = build_hub(&config)?;
        Ok(Self::with_hub(config, opener, hub))
    }

    /// Use a prepared hub instead of the configured sinks
    pub fn with_hub(config: AppConfig, opener: Arc<dyn PortOpener>, hub: DispatchHub) -> Self {
        Self {
            config,
            opener,
            hub,
        }
    }

    /// Run until the capture loop ends, then flush the sinks.
    ///
    /// A connect failure is returned after dispatch has been shut down.
    pub async fn run(self, cancel: CancellationToken) -> Result<RunSummary, ServiceError> {
        let hub = Arc::new(self.hub);
        hub.start();

        let (handoff, snapshots) = mpsc::channel(self.config.capture.handoff_capacity.max(1));
        let pipeline = SnapshotPipeline::new(
            QualityGate::default(),
            MovementFilter::new(self.config.capture.min_movement_meters),
            Arc::clone(&hub),
        );
        let consumer = tokio::spawn(pipeline.run(snapshots));

        let capture = CaptureLoop::new(
            self.opener,
            capture_settings(&self.config),
            handoff,
            Arc::new(CaptureStats::default()),
        );
        let capture_cancel = cancel.clone();
        let captured = tokio::task::spawn_blocking(move || capture.run(capture_cancel)).await;

        // The capture loop owned the only sender, so the consumer ends once drained
        let filter = consumer.await?;
        let shutdown = hub.shutdown().await;
        let sinks = hub.stats();

        info!(
            "Filter: {} valid, {} invalid, {} stationary, {} dispatched",
            filter.valid, filter.invalid, filter.stationary, filter.dispatched
        );
        for (kind, counts) in &sinks {
            info!(
                "{}: {} enqueued, {} delivered, {} failed batches, {} requeued, {} dropped, {} overflow",
                kind,
                counts.enqueued,
                counts.delivered_records,
                counts.failed_batches,
                counts.requeued_records,
                counts.dropped_records,
                counts.overflow_dropped
            );
        }

        let capture = captured??;
        Ok(RunSummary {
            capture,
            filter,
            sinks,
            shutdown,
        })
    }
}
