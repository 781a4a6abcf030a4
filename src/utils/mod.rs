//! Utility modules

pub mod autoconnect;

pub use autoconnect::{
    connect_with_retry, sleep_cancellable, AutoConnectConfig, ConnectError, ConnectTarget,
    Connection, PortSelection,
};
