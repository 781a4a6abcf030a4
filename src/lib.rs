//! # gpsrelay Core Library
//!
//! Ingests NMEA-0183 telemetry from a serial GPS receiver and relays
//! validated, movement-filtered position snapshots to independent sinks:
//! - JSON-lines files
//! - HTTP APIs
//! - S3-compatible object storage
//! - SQLite databases
//!
//! ## Features
//!
//! - Receiver auto-detection by probing candidate ports for NMEA traffic
//! - Checksum-validated RMC/GGA/VTG decoding with partial-update accumulation
//! - Fix quality and minimum-movement filtering
//! - Per-sink batching with exponential-backoff retries and explicit failure policies
//! - Replay of recorded NMEA logs through the same pipeline
//!
//! ## Example
//!
//! ```rust,no_run
//! use gpsrelay_core::{AppConfig, SerialOpener, Service};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let service = Service::new(config, Arc::new(SerialOpener))?;
//!
//!     let summary = service.run(CancellationToken::new()).await?;
//!     println!("Dispatched {} snapshots", summary.filter.dispatched);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::capture::{CaptureExit, CaptureLoop, CaptureSettings, CaptureSummary};
pub use crate::core::dispatch::{DispatchHub, FlushOutcome, SinkPipeline, SinkSettings};
pub use crate::core::filter::{haversine_distance, Movement, MovementFilter, QualityGate};
pub use crate::core::pipeline::{Decision, SnapshotPipeline};
pub use crate::core::position::{PositionState, Snapshot};
pub use crate::core::protocol::{decode, GpsFixQuality, Sentence};
pub use crate::core::replay::{ReplayOpener, ScriptedOpener};
pub use crate::core::retry::{retry_with_backoff, RetryPolicy};
pub use crate::core::service::{RunSummary, Service, ServiceError};
pub use crate::core::sink::{FailurePolicy, Sink, SinkError, SinkKind, SinkRecord};
pub use crate::core::transport::{LineSource, PortOpener, SerialOpener, TransportError};
pub use crate::utils::autoconnect::{AutoConnectConfig, PortSelection};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
