//! Object storage sink
//!
//! Each batch is split by device and UTC day, and every group is uploaded as
//! one JSON object with an HTTP PUT against an S3-compatible endpoint.
//! Object ids are derived from the group payload, so retrying a partly
//! uploaded batch overwrites the groups that already landed.

use super::{batch_json, Sink, SinkError, SinkKind, SinkRecord};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Object storage sink configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreSinkConfig {
    /// Base URL of the storage service
    pub endpoint: String,
    pub bucket: String,
    /// Key prefix inside the bucket
    pub prefix: String,
    pub bearer_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ObjectStoreSinkConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            prefix: "gps-data".to_string(),
            bearer_token: None,
            timeout_secs: 30,
        }
    }
}

/// Object key `<prefix>/<device>/<yyyy>/<mm>/<dd>/<HHMMSS>_<id>.json`
pub fn object_key(prefix: &str, device_id: &str, time: DateTime<Utc>, id: Uuid) -> String {
    let mut segments = Vec::with_capacity(3);
    let prefix = prefix.trim_matches('/');
    if !prefix.is_empty() {
        segments.push(prefix.to_string());
    }
    segments.push(key_segment(device_id));
    segments.push(format!(
        "{}/{}_{}.json",
        time.format("%Y/%m/%d"),
        time.format("%H%M%S"),
        id
    ));
    segments.join("/")
}

/// Device ids are often port paths; keep them to one key segment
fn key_segment(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Uploads batches as JSON objects grouped by device and day
pub struct ObjectStoreSink {
    client: Client,
    config: ObjectStoreSinkConfig,
}

impl ObjectStoreSink {
    pub fn new(config: ObjectStoreSinkConfig) -> Result<Self, SinkError> {
        if config.endpoint.is_empty() || config.bucket.is_empty() {
            return Err(SinkError::Config(
                "object store endpoint and bucket are required".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, config })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            key
        )
    }

    async fn upload_group(&self, device_id: &str, group: &[SinkRecord]) -> Result<(), SinkError> {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            return Ok(());
        };
        let first_time = first.snapshot.effective_time();
        let last_time = last.snapshot.effective_time();

        let body = batch_json(group)?;
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, &body);
        let key = object_key(&self.config.prefix, device_id, first_time, id);
        let mut request = self
            .client
            .put(self.object_url(&key))
            .header(CONTENT_TYPE, "application/json")
            .header("x-amz-meta-device-id", device_id)
            .header("x-amz-meta-record-count", group.len().to_string())
            .header(
                "x-amz-meta-first-timestamp",
                first_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .header(
                "x-amz-meta-last-timestamp",
                last_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .body(body);

        if let Some(token) = &self.config.bearer_token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }

        debug!("Uploaded {} records as {}", group.len(), key);
        Ok(())
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    fn kind(&self) -> SinkKind {
        SinkKind::ObjectStore
    }

    async fn deliver_batch(&self, batch: &[SinkRecord]) -> Result<(), SinkError> {
        let mut groups: BTreeMap<(String, NaiveDate), Vec<SinkRecord>> = BTreeMap::new();
        for record in batch {
            let day = record.snapshot.effective_time().date_naive();
            groups
                .entry((record.snapshot.position.device_id.clone(), day))
                .or_default()
                .push(record.clone());
        }

        for ((device_id, _), group) in &groups {
            self.upload_group(device_id, group).await?;
        }
        Ok(())
    }
}
