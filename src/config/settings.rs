//! Application settings and per-sink configuration

use super::ConfigError;
use crate::core::dispatch::SinkSettings;
use crate::core::retry::RetryPolicy;
use crate::core::sink::{
    ApiSinkConfig, DatabaseSinkConfig, FailurePolicy, FileSinkConfig, ObjectStoreSinkConfig,
    SinkKind,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Receiver connection
    pub serial: SerialSettings,
    /// Snapshot emission and filtering
    pub capture: CaptureConfig,
    /// Dispatch hub behaviour
    pub dispatch: DispatchConfig,
    /// Delivery sinks
    pub sinks: SinksConfig,
}

impl AppConfig {
    /// Load config from the default location, or defaults if it does not exist
    pub fn load() -> Result<Self, ConfigError> {
        match super::config_file() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load and validate config from a file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    /// Parse and validate TOML
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check value ranges and cross-field requirements
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.serial.baud_rate == 0 {
            return invalid("serial.baud_rate must be greater than 0".to_string());
        }
        if !self.serial.auto_detect && self.serial.port.as_deref().unwrap_or("").is_empty() {
            return invalid("serial.port is required when auto_detect is off".to_string());
        }
        if !self.capture.min_movement_meters.is_finite() || self.capture.min_movement_meters < 0.0
        {
            return invalid("capture.min_movement_meters must be >= 0".to_string());
        }
        if self.capture.handoff_capacity == 0 {
            return invalid("capture.handoff_capacity must be greater than 0".to_string());
        }

        for kind in SinkKind::ALL {
            let common = self.sinks.common(kind);
            if !common.enabled {
                continue;
            }
            if common.batch_size == 0 {
                return invalid(format!("sinks.{}.batch_size must be greater than 0", kind));
            }
            if common.max_retries == 0 {
                return invalid(format!("sinks.{}.max_retries must be greater than 0", kind));
            }
            if common.flush_interval_secs == 0 {
                return invalid(format!(
                    "sinks.{}.flush_interval_secs must be greater than 0",
                    kind
                ));
            }
        }

        if self.sinks.api.common.enabled && self.sinks.api.target.endpoint.is_empty() {
            return invalid("sinks.api.endpoint is required".to_string());
        }
        let store = &self.sinks.object_store;
        if store.common.enabled && (store.target.endpoint.is_empty() || store.target.bucket.is_empty())
        {
            return invalid("sinks.object_store.endpoint and bucket are required".to_string());
        }

        Ok(())
    }
}

/// Serial receiver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Fixed port; used without probing when auto-detect is off
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Probe candidate ports for NMEA traffic
    pub auto_detect: bool,
    pub read_timeout_ms: u64,
    /// How long each candidate is listened to during detection
    pub probe_window_secs: u64,
    pub connect_attempts: u32,
    pub connect_delay_secs: u64,
    /// Pause after a non-timeout read error
    pub read_error_pause_ms: u64,
    /// Identifier stamped on every snapshot; defaults to the port name
    pub device_id: Option<String>,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 4800,
            auto_detect: true,
            read_timeout_ms: 1000,
            probe_window_secs: 5,
            connect_attempts: 5,
            connect_delay_secs: 5,
            read_error_pause_ms: 1000,
            device_id: None,
        }
    }
}

/// Capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Minimum seconds between emitted snapshots
    pub interval_secs: u64,
    /// Movement below this distance is suppressed
    pub min_movement_meters: f64,
    /// Capacity of the capture to filter channel
    pub handoff_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            min_movement_meters: 10.0,
            handoff_capacity: 256,
        }
    }
}

/// Dispatch hub settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound for the shutdown flush
    pub shutdown_grace_secs: u64,
    /// Keep the full snapshot JSON in sinks that store structured columns
    pub raw_data_retention: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: 30,
            raw_data_retention: false,
        }
    }
}

/// Settings shared by every sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkCommon {
    pub enabled: bool,
    pub batch_size: usize,
    /// Delivery attempts per batch, first attempt included
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub flush_interval_secs: u64,
    /// 0 means unbounded
    pub max_queue_len: usize,
    /// Overrides the sink's default failure policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
}

impl Default for SinkCommon {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: 10,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
            flush_interval_secs: 5,
            max_queue_len: 10_000,
            failure_policy: None,
        }
    }
}

impl SinkCommon {
    /// Dispatch settings for a sink of `kind`
    pub fn to_settings(&self, kind: SinkKind) -> SinkSettings {
        SinkSettings {
            batch_size: self.batch_size,
            retry: RetryPolicy::new(
                self.max_retries,
                Duration::from_millis(self.retry_base_delay_ms),
            )
            .max_delay(Duration::from_millis(self.retry_max_delay_ms)),
            failure_policy: self
                .failure_policy
                .unwrap_or_else(|| kind.default_failure_policy()),
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            max_queue_len: self.max_queue_len,
        }
    }
}

/// One sink section: shared settings plus the sink's own fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSection<T: Default> {
    #[serde(flatten)]
    pub common: SinkCommon,
    #[serde(flatten)]
    pub target: T,
}

/// All sink sections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinksConfig {
    pub file: SinkSection<FileSinkConfig>,
    pub api: SinkSection<ApiSinkConfig>,
    pub object_store: SinkSection<ObjectStoreSinkConfig>,
    pub database: SinkSection<DatabaseSinkConfig>,
}

impl SinksConfig {
    /// Shared settings of one sink
    pub fn common(&self, kind: SinkKind) -> &SinkCommon {
        match kind {
            SinkKind::File => &self.file.common,
            SinkKind::Api => &self.api.common,
            SinkKind::ObjectStore => &self.object_store.common,
            SinkKind::Database => &self.database.common,
        }
    }

    /// Sinks switched on, in dispatch order
    pub fn enabled(&self) -> Vec<SinkKind> {
        SinkKind::ALL
            .into_iter()
            .filter(|kind| self.common(*kind).enabled)
            .collect()
    }
}
