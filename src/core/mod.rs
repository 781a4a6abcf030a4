//! Core module containing the ingestion and dispatch pipeline
//!
//! This module provides:
//! - NMEA sentence decoding
//! - Serial transport and receiver discovery
//! - Position accumulation and snapshot filtering
//! - The capture loop with its state machine
//! - Per-sink batching, retry and delivery
//! - Log replay for offline runs

pub mod capture;
pub mod discovery;
pub mod dispatch;
pub mod filter;
pub mod pipeline;
pub mod position;
pub mod protocol;
pub mod replay;
pub mod retry;
pub mod service;
pub mod sink;
pub mod state_machine;
pub mod stats;
pub mod transport;
