//! SQLite database sink
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE fix_quality_codes (
//!     code INTEGER PRIMARY KEY,
//!     label TEXT NOT NULL
//! );
//! CREATE TABLE gps_positions (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     device_id TEXT NOT NULL,
//!     timestamp TEXT NOT NULL,
//!     captured_at TEXT NOT NULL,
//!     latitude REAL NOT NULL,
//!     longitude REAL NOT NULL,
//!     altitude REAL,
//!     speed_kmh REAL,
//!     speed_mph REAL,
//!     course REAL,
//!     course_direction TEXT,
//!     satellites INTEGER,
//!     fix_quality INTEGER,
//!     fix_quality_label TEXT,
//!     hdop REAL,
//!     status TEXT,
//!     raw_json TEXT
//! );
//! CREATE INDEX idx_positions_device_time ON gps_positions(device_id, timestamp);
//! ```

use super::{Sink, SinkError, SinkKind, SinkRecord};
use crate::core::protocol::GpsFixQuality;
use async_trait::async_trait;
use chrono::SecondsFormat;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Database sink configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSinkConfig {
    /// SQLite database file
    pub path: PathBuf,
    /// Store the full snapshot JSON alongside the structured columns
    #[serde(skip)]
    pub raw_data_retention: bool,
}

impl Default for DatabaseSinkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("gps_positions.db"),
            raw_data_retention: false,
        }
    }
}

/// Inserts each batch into `gps_positions` inside one transaction
pub struct DatabaseSink {
    conn: Arc<Mutex<Connection>>,
    raw_data_retention: bool,
}

impl DatabaseSink {
    /// Open (or create) the database file and its schema
    pub fn open(config: &DatabaseSinkConfig) -> Result<Self, SinkError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&config.path)?;
        Self::with_connection(conn, config.raw_data_retention)
    }

    /// In-memory database
    pub fn open_in_memory(raw_data_retention: bool) -> Result<Self, SinkError> {
        Self::with_connection(Connection::open_in_memory()?, raw_data_retention)
    }

    fn with_connection(conn: Connection, raw_data_retention: bool) -> Result<Self, SinkError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            raw_data_retention,
        })
    }

    /// Number of stored positions
    pub fn row_count(&self) -> Result<u64, SinkError> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM gps_positions", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn init_schema(conn: &Connection) -> Result<(), SinkError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fix_quality_codes (
            code INTEGER PRIMARY KEY,
            label TEXT NOT NULL
        )",
        [],
    )?;
    for quality in GpsFixQuality::ALL {
        conn.execute(
            "INSERT OR IGNORE INTO fix_quality_codes (code, label) VALUES (?1, ?2)",
            params![quality.code(), quality.label()],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS gps_positions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            captured_at TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            altitude REAL,
            speed_kmh REAL,
            speed_mph REAL,
            course REAL,
            course_direction TEXT,
            satellites INTEGER,
            fix_quality INTEGER,
            fix_quality_label TEXT,
            hdop REAL,
            status TEXT,
            raw_json TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_positions_device_time
            ON gps_positions(device_id, timestamp)",
        [],
    )?;
    Ok(())
}

fn insert_batch(
    conn: &mut Connection,
    batch: &[SinkRecord],
    raw_data_retention: bool,
) -> Result<(), SinkError> {
    // An early return drops the transaction, rolling the whole batch back
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO gps_positions (
                device_id, timestamp, captured_at, latitude, longitude, altitude,
                speed_kmh, speed_mph, course, course_direction, satellites,
                fix_quality, fix_quality_label, hdop, status, raw_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )?;

        for record in batch {
            let snapshot = &record.snapshot;
            let position = &snapshot.position;
            let raw_json = if raw_data_retention {
                Some(serde_json::to_string(snapshot)?)
            } else {
                None
            };

            stmt.execute(params![
                position.device_id,
                snapshot
                    .effective_time()
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                snapshot
                    .captured_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                position.latitude,
                position.longitude,
                position.altitude,
                position.speed_kmh,
                position.speed_mph,
                position.course,
                position.course_direction,
                position.satellites,
                position.fix_quality,
                position.fix_quality.map(GpsFixQuality::label_for),
                position.hdop,
                position.status,
                raw_json,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl Sink for DatabaseSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Database
    }

    async fn deliver_batch(&self, batch: &[SinkRecord]) -> Result<(), SinkError> {
        let conn = Arc::clone(&self.conn);
        let batch = batch.to_vec();
        let raw_data_retention = self.raw_data_retention;

        tokio::task::spawn_blocking(move || -> Result<(), SinkError> {
            let mut conn = conn.lock();
            insert_batch(&mut conn, &batch, raw_data_retention)?;
            debug!("Inserted {} positions", batch.len());
            Ok(())
        })
        .await?
    }
}
