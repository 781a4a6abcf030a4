//! End-to-end tests through the public API

use async_trait::async_trait;
use gpsrelay_core::core::capture::{CaptureExit, CaptureLoop, CaptureSettings};
use gpsrelay_core::core::stats::CaptureStats;
use gpsrelay_core::utils::autoconnect::ConnectTarget;
use gpsrelay_core::{
    AppConfig, AutoConnectConfig, DispatchHub, FailurePolicy, PortSelection, PositionState,
    ReplayOpener, RetryPolicy, ScriptedOpener, Service, Sink, SinkError, SinkKind, SinkRecord,
    SinkSettings, Snapshot,
};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
const VTG: &str = "$GPVTG,054.7,T,034.4,M,005.5,N,010.2,K*48";

fn settings(port: &str) -> CaptureSettings {
    CaptureSettings {
        target: ConnectTarget {
            selection: PortSelection::Fixed(port.to_string()),
            baud_rate: 4800,
            read_timeout: Duration::from_millis(100),
            probe_window: Duration::from_secs(1),
        },
        autoconnect: AutoConnectConfig {
            delay: Duration::ZERO,
            max_attempts: 1,
        },
        interval: Duration::ZERO,
        read_error_pause: Duration::ZERO,
        device_id: None,
    }
}

fn snapshot(latitude: f64) -> Snapshot {
    PositionState {
        latitude: Some(latitude),
        longitude: Some(11.5),
        fix_quality: Some(1),
        satellites: Some(7),
        ..PositionState::new("gps-0")
    }
    .snapshot(chrono::Utc::now())
}

/// Sink keeping every batch in memory, failing the first `failures` calls
struct MemorySink {
    kind: SinkKind,
    batches: Mutex<Vec<usize>>,
    attempts: Mutex<Vec<Instant>>,
    failures: u32,
}

impl MemorySink {
    fn new(kind: SinkKind, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            kind,
            batches: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            failures,
        })
    }

    fn batches(&self) -> Vec<usize> {
        self.batches.lock().clone()
    }

    fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn deliver_batch(&self, batch: &[SinkRecord]) -> Result<(), SinkError> {
        let call = {
            let mut attempts = self.attempts.lock();
            attempts.push(Instant::now());
            attempts.len()
        };
        if call <= self.failures as usize {
            return Err(SinkError::Status(503));
        }
        self.batches.lock().push(batch.len());
        Ok(())
    }
}

#[test]
fn test_sentences_accumulate_into_one_snapshot() {
    let (tx, mut rx) = mpsc::channel(16);
    let capture = CaptureLoop::new(
        Arc::new(ScriptedOpener::new([GGA, "", "garbage", RMC, VTG])),
        settings("/dev/ttyUSB0"),
        tx,
        Arc::new(CaptureStats::default()),
    );
    let stats = capture.stats();

    let summary = capture.run(CancellationToken::new()).unwrap();
    assert_eq!(summary.exit, CaptureExit::EndOfStream);
    assert_eq!(summary.port, "/dev/ttyUSB0");

    let mut snapshots = Vec::new();
    while let Ok(snapshot) = rx.try_recv() {
        snapshots.push(snapshot);
    }
    assert_eq!(snapshots.len(), 3);

    // After RMC every field from both sentences is present
    let merged = &snapshots[1].position;
    assert_eq!(merged.device_id, "/dev/ttyUSB0");
    assert!((merged.latitude.unwrap() - 48.1173).abs() < 1e-4);
    assert!((merged.longitude.unwrap() - 11.516_667).abs() < 1e-4);
    assert_eq!(merged.fix_quality, Some(1));
    assert_eq!(merged.satellites, Some(8));
    assert_eq!(merged.status.as_deref(), Some("A"));
    assert!((merged.speed_kmh.unwrap() - 41.48).abs() < 0.01);
    assert_eq!(merged.altitude, Some(545.4));

    // VTG overwrites course and speed only
    let last = &snapshots[2].position;
    assert_eq!(last.course, Some(54.7));
    assert!((last.speed_kmh.unwrap() - 10.186).abs() < 0.01);
    assert_eq!(last.satellites, Some(8));

    let counts = stats.counts();
    assert_eq!(counts.sentences_decoded, 3);
    assert_eq!(counts.sentences_rejected, 0);
}

#[tokio::test]
async fn test_fan_out_batches_per_sink() {
    let sinks: Vec<Arc<MemorySink>> = [SinkKind::File, SinkKind::Api, SinkKind::Database]
        .into_iter()
        .map(|kind| MemorySink::new(kind, 0))
        .collect();

    let mut hub = DispatchHub::new(Duration::from_secs(5));
    for sink in &sinks {
        let settings = SinkSettings {
            batch_size: 2,
            ..SinkSettings::for_kind(sink.kind())
        };
        hub.add_sink(Arc::clone(sink) as Arc<dyn Sink>, settings);
    }

    for i in 0..4 {
        assert_eq!(hub.dispatch(&snapshot(48.0 + f64::from(i))), 3);
    }
    hub.flush_all().await;

    for sink in &sinks {
        assert_eq!(sink.batches(), vec![2, 2]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failing_sink_does_not_block_others() {
    let healthy = MemorySink::new(SinkKind::File, 0);
    let broken = MemorySink::new(SinkKind::Api, u32::MAX);

    let mut hub = DispatchHub::new(Duration::from_secs(5));
    hub.add_sink(Arc::clone(&healthy) as Arc<dyn Sink>, SinkSettings::for_kind(SinkKind::File));
    hub.add_sink(
        Arc::clone(&broken) as Arc<dyn Sink>,
        SinkSettings {
            retry: RetryPolicy::new(3, Duration::from_secs(1)),
            failure_policy: FailurePolicy::Drop,
            ..SinkSettings::for_kind(SinkKind::Api)
        },
    );

    hub.dispatch(&snapshot(48.1));
    hub.flush_all().await;

    assert_eq!(healthy.batches(), vec![1]);
    let attempts = broken.attempt_times();
    assert_eq!(attempts.len(), 3);
    let first_gap = attempts[1] - attempts[0];
    let second_gap = attempts[2] - attempts[1];
    assert!(first_gap >= Duration::from_secs(1));
    assert!(second_gap > first_gap);

    let stats = hub.stats();
    let (_, api) = stats
        .iter()
        .find(|(kind, _)| *kind == SinkKind::Api)
        .unwrap();
    assert_eq!(api.failed_batches, 1);
    assert_eq!(api.dropped_records, 1);
    assert_eq!(api.delivery_attempts, 3);
}

#[tokio::test]
async fn test_replayed_log_reaches_database() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("drive.nmea");
    let mut log = std::fs::File::create(&log_path).unwrap();
    writeln!(log, "{}\r\n{}\r\n{}", GGA, RMC, VTG).unwrap();
    drop(log);

    let db_path = dir.path().join("gps.db");
    let mut config = AppConfig::default();
    config.serial.port = Some(log_path.display().to_string());
    config.serial.auto_detect = false;
    config.serial.device_id = Some("truck-7".to_string());
    config.capture.interval_secs = 0;
    config.sinks.database.common.enabled = true;
    config.sinks.database.target.path = db_path.clone();
    config.dispatch.raw_data_retention = true;

    let service = Service::new(config, Arc::new(ReplayOpener::new(&log_path))).unwrap();
    let summary = service.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.capture.exit, CaptureExit::EndOfStream);
    // Same coordinates three times: only the first one moves
    assert_eq!(summary.filter.valid, 3);
    assert_eq!(summary.filter.stationary, 2);
    assert_eq!(summary.filter.dispatched, 1);
    assert!(summary.shutdown.drained);

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    let (device, label): (String, String) = conn
        .query_row(
            "SELECT device_id, fix_quality_label FROM gps_positions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(device, "truck-7");
    assert_eq!(label, "GPS");
}
