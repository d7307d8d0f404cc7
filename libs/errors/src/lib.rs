//! Unified error handling for the genset telemetry services
//!
//! Service crates keep their own narrow error enums for hot paths and convert
//! into [`ScadaError`] at process and API boundaries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ErrorInfo - API error response type
// ============================================================================

/// Error body returned by HTTP endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// HTTP status code
    pub code: u16,
    /// Error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// ============================================================================
// ScadaError - Main error type
// ============================================================================

/// Service-wide error type
#[derive(Debug, Error)]
pub enum ScadaError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Storage Errors
    // ======================================
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // ======================================
    // Device Communication Errors
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    // ======================================
    // Lookup Errors
    // ======================================
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ScadaError
pub type ScadaResult<T> = Result<T, ScadaError>;

impl ScadaError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,

            Self::InvalidInput(_) => 400,

            Self::Protocol { .. } | Self::ConnectionFailed { .. } => 502,

            Self::StartupFailed(_) => 503,

            Self::Timeout(_) => 504,

            Self::Configuration(_)
            | Self::InvalidConfig { .. }
            | Self::Database(_)
            | Self::Sqlite(_)
            | Self::Redis(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_)
            | Self::Other(_) => 500,
        }
    }

    /// Whether the operation that produced this error may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ConnectionFailed { .. } | Self::Redis(_)
        )
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        let info = ErrorInfo::new(self.to_string()).with_code(self.status_code());
        match self {
            Self::InvalidConfig { field, .. } => info.with_details(format!("field: {}", field)),
            _ => info,
        }
    }
}

impl From<serde_json::Error> for ScadaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<figment::Error> for ScadaError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::ScadaError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::ScadaError::Configuration(format!($fmt, $($arg)*))
    };
}

#[cfg(feature = "axum-support")]
impl axum::response::IntoResponse for ScadaError {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::from_u16(self.status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self.to_error_info())).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ScadaError::NotFound {
                resource: "device 7".into()
            }
            .status_code(),
            404
        );
        assert_eq!(ScadaError::Timeout("10.0.0.5:502".into()).status_code(), 504);
        assert_eq!(ScadaError::Configuration("bad".into()).status_code(), 500);
    }

    #[test]
    fn test_retryable() {
        assert!(ScadaError::Timeout("x".into()).is_retryable());
        assert!(ScadaError::ConnectionFailed {
            endpoint: "10.0.0.5:502".into(),
            reason: "refused".into()
        }
        .is_retryable());
        assert!(!ScadaError::Configuration("x".into()).is_retryable());
    }

    #[test]
    fn test_config_error_macro() {
        let err = config_error!("poll interval must be > 0, got {}", 0);
        assert_eq!(
            err.to_string(),
            "Configuration error: poll interval must be > 0, got 0"
        );
    }

    #[test]
    fn test_error_info_details() {
        let err = ScadaError::InvalidConfig {
            field: "devices[0].port".into(),
            reason: "must be non-zero".into(),
        };
        let info = err.to_error_info();
        assert_eq!(info.code, 500);
        assert_eq!(info.details.as_deref(), Some("field: devices[0].port"));
    }

    #[test]
    fn test_json_error_conversion() {
        let err: ScadaError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ScadaError::Serialization(_)));
    }
}
