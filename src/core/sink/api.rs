//! HTTP API sink

use super::{batch_json, Sink, SinkError, SinkKind, SinkRecord};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// API sink configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSinkConfig {
    /// URL receiving the POSTed batches
    pub endpoint: String,
    /// Sent as `Authorization: Bearer <token>`
    pub bearer_token: Option<String>,
    /// Sent as `X-API-Key`
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiSinkConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bearer_token: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// POSTs each batch as a JSON array of snapshots
pub struct ApiSink {
    client: Client,
    config: ApiSinkConfig,
}

impl ApiSink {
    pub fn new(config: ApiSinkConfig) -> Result<Self, SinkError> {
        if config.endpoint.is_empty() {
            return Err(SinkError::Config("api endpoint is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Sink for ApiSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Api
    }

    async fn deliver_batch(&self, batch: &[SinkRecord]) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(batch_json(batch)?);

        if let Some(token) = &self.config.bearer_token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }

        debug!("Posted {} records to {}", batch.len(), self.config.endpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sink::testing::{record, spawn_http_server};

    fn batch() -> Vec<SinkRecord> {
        vec![
            record(SinkKind::Api, "gps-1", 48.1, 11.5, (12, 0, 0)),
            record(SinkKind::Api, "gps-1", 48.2, 11.6, (12, 0, 5)),
        ]
    }

    #[tokio::test]
    async fn test_posts_json_array_with_auth() {
        let (url, mut requests) = spawn_http_server(201).await;
        let sink = ApiSink::new(ApiSinkConfig {
            endpoint: format!("{}/ingest", url),
            bearer_token: Some("secret".to_string()),
            api_key: Some("key-1".to_string()),
            timeout_secs: 5,
        })
        .unwrap();

        sink.deliver_batch(&batch()).await.unwrap();

        let request = requests.recv().await.unwrap();
        assert!(request.request_line().starts_with("POST /ingest"));
        assert_eq!(request.header("authorization").as_deref(), Some("Bearer secret"));
        assert_eq!(request.header("x-api-key").as_deref(), Some("key-1"));

        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_error_status_fails_batch() {
        let (url, _requests) = spawn_http_server(503).await;
        let sink = ApiSink::new(ApiSinkConfig {
            endpoint: url,
            ..ApiSinkConfig::default()
        })
        .unwrap();

        assert!(matches!(
            sink.deliver_batch(&batch()).await,
            Err(SinkError::Status(503))
        ));
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        assert!(matches!(
            ApiSink::new(ApiSinkConfig::default()),
            Err(SinkError::Config(_))
        ));
    }
}
