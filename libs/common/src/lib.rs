//! Shared service plumbing for the telemetry services
//!
//! Provides:
//! - logging initialization (console + daily rolling file)
//! - graceful shutdown signal handling

pub mod logging;
pub mod shutdown;

pub use logging::{init_with_config, parse_level, LogConfig};
pub use shutdown::{shutdown_token, wait_for_shutdown};
