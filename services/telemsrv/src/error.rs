//! Error handling for the telemetry service
//!
//! Device-facing failures are split the way the poller reacts to them:
//! connection and protocol failures take the device offline and trigger the
//! retry backoff, decode failures only drop the affected register block.

use errors::ScadaError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TelemetryError {
    /// Refused, reset, or closed by peer
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// No complete answer within the deadline
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Bad CRC, malformed or short frame, exception response
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Register block too short for its declared fields
    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Store, bus, or persistence backend failure
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the telemetry service
pub type Result<T> = std::result::Result<T, TelemetryError>;

impl TelemetryError {
    pub fn connection(msg: impl Into<String>) -> Self {
        TelemetryError::ConnectionError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        TelemetryError::TimeoutError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        TelemetryError::ProtocolError(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        TelemetryError::DecodeError(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        TelemetryError::ConfigError(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        TelemetryError::StorageError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        TelemetryError::InternalError(msg.into())
    }

    pub fn not_connected() -> Self {
        TelemetryError::ConnectionError("Not connected".to_string())
    }

    /// Failures that mark the device offline and start the retry backoff
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            TelemetryError::ConnectionError(_)
                | TelemetryError::TimeoutError(_)
                | TelemetryError::ProtocolError(_)
        )
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                TelemetryError::TimeoutError(err.to_string())
            },
            _ => TelemetryError::ConnectionError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::SerializationError(format!("JSON: {err}"))
    }
}

impl From<sqlx::Error> for TelemetryError {
    fn from(err: sqlx::Error) -> Self {
        TelemetryError::StorageError(format!("SQLite: {err}"))
    }
}

impl From<anyhow::Error> for TelemetryError {
    fn from(err: anyhow::Error) -> Self {
        TelemetryError::StorageError(format!("{err:#}"))
    }
}

impl From<tokio_modbus::Error> for TelemetryError {
    fn from(err: tokio_modbus::Error) -> Self {
        match err {
            tokio_modbus::Error::Transport(io) => io.into(),
            other => TelemetryError::ProtocolError(format!("Modbus: {other}")),
        }
    }
}

// ============================================================================
// Conversion to ScadaError for process and API boundaries
// ============================================================================

impl From<TelemetryError> for ScadaError {
    fn from(err: TelemetryError) -> Self {
        match err {
            TelemetryError::ConnectionError(msg) => ScadaError::ConnectionFailed {
                endpoint: "device".to_string(),
                reason: msg,
            },
            TelemetryError::TimeoutError(msg) => ScadaError::Timeout(msg),
            TelemetryError::ProtocolError(msg) | TelemetryError::DecodeError(msg) => {
                ScadaError::Protocol {
                    protocol: "modbus".to_string(),
                    message: msg,
                }
            },
            TelemetryError::ConfigError(msg) => ScadaError::Configuration(msg),
            TelemetryError::StorageError(msg) => ScadaError::Database(msg),
            TelemetryError::SerializationError(msg) => ScadaError::Serialization(msg),
            TelemetryError::InternalError(msg) => ScadaError::Internal(msg),
        }
    }
}
