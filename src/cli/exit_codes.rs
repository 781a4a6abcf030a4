//! CLI Exit Codes
//!
//! Standard exit codes for service supervision and automation.

use crate::config::ConfigError;
use crate::core::capture::CaptureError;
use crate::core::service::ServiceError;
use crate::core::transport::TransportError;
use crate::utils::autoconnect::ConnectError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// No port carried GPS traffic
    pub const DEVICE_NOT_FOUND: u8 = 12;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    pub fn success() -> Self {
        Self::Success(None)
    }

    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) => Some(msg),
            Self::Error(_, msg) => Some(msg),
            _ => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&TransportError> for CliResult {
    fn from(err: &TransportError) -> Self {
        let code = match err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::NoReceiverDetected => ExitCodes::DEVICE_NOT_FOUND,
            TransportError::Cancelled => ExitCodes::CANCELLED,
            _ => ExitCodes::CONNECTION_FAILED,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<&ServiceError> for CliResult {
    fn from(err: &ServiceError) -> Self {
        let code = match err {
            ServiceError::Sink { .. } => ExitCodes::CONFIG_ERROR,
            ServiceError::Capture(CaptureError::Connect(ConnectError::Cancelled)) => {
                ExitCodes::CANCELLED
            }
            ServiceError::Capture(CaptureError::Connect(ConnectError::Exhausted { .. })) => {
                ExitCodes::CONNECTION_FAILED
            }
            ServiceError::Task(_) => ExitCodes::INTERNAL_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        3 => "Connection failed",
        7 => "Permission denied",
        8 => "Configuration error",
        11 => "Operation cancelled",
        12 => "No GPS receiver detected",
        14 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(ExitCodes::CONFIG_ERROR, "bad baud rate");
        assert!(!error.is_success());
        assert_eq!(error.message(), Some("bad baud rate"));
    }

    #[test]
    fn test_connect_exhaustion_maps_to_connection_failed() {
        let err = ServiceError::Capture(CaptureError::Connect(ConnectError::Exhausted {
            attempts: 5,
            last_error: TransportError::PortNotFound("/dev/ttyUSB0".to_string()),
        }));
        let result = CliResult::from(&err);
        assert_eq!(result.code(), ExitCodes::CONNECTION_FAILED);
        assert_eq!(exit_code_description(result.code()), "Connection failed");
    }

    #[test]
    fn test_transport_error_codes() {
        assert_eq!(
            CliResult::from(&TransportError::NoReceiverDetected).code(),
            ExitCodes::DEVICE_NOT_FOUND
        );
        assert_eq!(
            CliResult::from(&TransportError::PortNotFound("COM9".to_string())).code(),
            ExitCodes::PORT_NOT_FOUND
        );
    }
}
