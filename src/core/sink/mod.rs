//! Delivery sinks
//!
//! A sink only knows how to deliver one batch. Queueing, batching, retry
//! and failure handling live in the dispatch layer.

mod api;
mod database;
mod file;
mod object_store;

pub use api::{ApiSink, ApiSinkConfig};
pub use database::{DatabaseSink, DatabaseSinkConfig};
pub use file::{FileSink, FileSinkConfig};
pub use object_store::{object_key, ObjectStoreSink, ObjectStoreSinkConfig};

use super::position::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sink identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    File,
    Api,
    ObjectStore,
    Database,
}

impl SinkKind {
    /// Every sink kind, in dispatch order
    pub const ALL: [SinkKind; 4] = [Self::File, Self::Api, Self::ObjectStore, Self::Database];

    /// Configuration name
    pub fn name(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Api => "api",
            Self::ObjectStore => "object_store",
            Self::Database => "database",
        }
    }

    /// What happens to a batch that exhausted its retries, unless configured
    pub fn default_failure_policy(&self) -> FailurePolicy {
        match self {
            Self::File | Self::Database => FailurePolicy::Requeue,
            Self::Api | Self::ObjectStore => FailurePolicy::Drop,
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown sink '{}'", s))
    }
}

/// Handling of a batch whose retries are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Put the batch back at the head of the queue for a later flush
    Requeue,
    /// Discard the batch
    Drop,
}

/// A snapshot enqueued for one sink
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRecord {
    pub sink: SinkKind,
    pub snapshot: Snapshot,
    pub enqueued_at: DateTime<Utc>,
}

impl SinkRecord {
    /// Wrap a snapshot for `sink`
    pub fn new(sink: SinkKind, snapshot: Snapshot) -> Self {
        Self {
            sink,
            snapshot,
            enqueued_at: Utc::now(),
        }
    }
}

/// Sink delivery errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Sink task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Sink misconfigured: {0}")]
    Config(String),
}

/// Delivery target for batches of records
#[async_trait]
pub trait Sink: Send + Sync {
    /// Which sink this is
    fn kind(&self) -> SinkKind;

    /// Deliver a whole batch; an error fails the entire batch
    async fn deliver_batch(&self, batch: &[SinkRecord]) -> Result<(), SinkError>;
}

/// JSON payload of a batch: a plain array of snapshots
pub(crate) fn batch_json(batch: &[SinkRecord]) -> Result<Vec<u8>, SinkError> {
    let snapshots: Vec<&Snapshot> = batch.iter().map(|r| &r.snapshot).collect();
    Ok(serde_json::to_vec(&snapshots)?)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::core::position::PositionState;
    use chrono::TimeZone;

    /// Record at a fixed position and receiver time
    pub fn record(
        sink: SinkKind,
        device: &str,
        lat: f64,
        lon: f64,
        hms: (u32, u32, u32),
    ) -> SinkRecord {
        let timestamp = Utc
            .with_ymd_and_hms(2024, 3, 23, hms.0, hms.1, hms.2)
            .single()
            .unwrap();
        let position = PositionState {
            timestamp: Some(timestamp),
            latitude: Some(lat),
            longitude: Some(lon),
            fix_quality: Some(1),
            satellites: Some(8),
            ..PositionState::new(device)
        };
        SinkRecord::new(sink, position.snapshot(timestamp))
    }

    /// Raw HTTP request captured by [`spawn_http_server`]
    #[derive(Debug, Clone)]
    pub struct CapturedRequest {
        pub head: String,
        pub body: Vec<u8>,
    }

    impl CapturedRequest {
        /// Header value by case-insensitive name
        pub fn header(&self, name: &str) -> Option<String> {
            self.head.lines().skip(1).find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case(name)
                    .then(|| value.trim().to_string())
            })
        }

        /// Request line, e.g. `POST /ingest HTTP/1.1`
        pub fn request_line(&self) -> &str {
            self.head.lines().next().unwrap_or_default()
        }
    }

    /// Minimal HTTP/1.1 server answering every request with `status`
    pub async fn spawn_http_server(
        status: u16,
    ) -> (String, tokio::sync::mpsc::UnboundedReceiver<CapturedRequest>) {
        spawn_scripted_http_server(vec![status]).await
    }

    /// Like [`spawn_http_server`], answering the n-th request with
    /// `statuses[n]`; the last status repeats
    pub async fn spawn_scripted_http_server(
        statuses: Vec<u16>,
    ) -> (String, tokio::sync::mpsc::UnboundedReceiver<CapturedRequest>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut served = 0;
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let head_end = loop {
                    let n = stream.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break None;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break Some(pos);
                    }
                };
                let Some(head_end) = head_end else { continue };

                let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
                let mut request = CapturedRequest {
                    head,
                    body: buf[head_end + 4..].to_vec(),
                };
                let length: usize = request
                    .header("content-length")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                while request.body.len() < length {
                    let n = stream.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.body.extend_from_slice(&chunk[..n]);
                }

                let _ = tx.send(request);

                let status = statuses
                    .get(served)
                    .or(statuses.last())
                    .copied()
                    .unwrap_or(200);
                served += 1;
                let response = format!(
                    "HTTP/1.1 {} Test\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in SinkKind::ALL {
            assert_eq!(kind.name().parse::<SinkKind>().unwrap(), kind);
        }
        assert!("s3".parse::<SinkKind>().is_err());
    }

    #[test]
    fn test_default_failure_policies() {
        assert_eq!(SinkKind::Database.default_failure_policy(), FailurePolicy::Requeue);
        assert_eq!(SinkKind::File.default_failure_policy(), FailurePolicy::Requeue);
        assert_eq!(SinkKind::Api.default_failure_policy(), FailurePolicy::Drop);
        assert_eq!(SinkKind::ObjectStore.default_failure_policy(), FailurePolicy::Drop);
    }

    #[test]
    fn test_batch_json_is_array() {
        let batch = vec![
            testing::record(SinkKind::Api, "gps-1", 48.1, 11.5, (12, 0, 0)),
            testing::record(SinkKind::Api, "gps-1", 48.2, 11.6, (12, 0, 5)),
        ];
        let value: serde_json::Value =
            serde_json::from_slice(&batch_json(&batch).unwrap()).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["device_id"], "gps-1");
        assert_eq!(items[1]["latitude"], 48.2);
    }
}
