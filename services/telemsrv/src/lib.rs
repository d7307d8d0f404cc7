//! Genset Telemetry Service (telemsrv)
//!
//! Polls generator and transfer-switch controllers over Modbus, publishes a
//! decoded snapshot per device to the real-time database, and raises
//! maintenance alerts as engine hours approach the next service interval.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │ ConfigProvider  │───►│   Orchestrator  │───►│   PollWorkers   │
//! │ (SQLite / YAML) │    │  (hot reload)   │    │ (RTU / framed)  │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!          │                                             │
//!          ▼                                             ▼
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   Maintenance   │◄───│      RTDB       │───►│ WebSocket feed  │
//! │   Scheduler     │───►│ (keys + pubsub) │    │   (/ws/metrics) │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```
//!
//! - **`protocols`**: RTU-over-TCP and framed TCP readers, register maps, decoding
//! - **`runtime`**: per-device workers, orchestration, retry backoff, publishing
//! - **`maintenance`**: due-interval policy and the periodic alert scheduler
//! - **`providers`**: device/template sources and alert persistence
//! - **`gateway`**: health, alert REST endpoints and the WebSocket fan-out

pub mod bootstrap;
pub mod config;
pub mod demo;
pub mod error;
pub mod gateway;
pub mod maintenance;
pub mod model;
pub mod protocols;
pub mod providers;
pub mod runtime;

// Re-export common types
pub use config::AppConfig;
pub use error::{Result, TelemetryError};
pub use maintenance::MaintenanceScheduler;
pub use model::{Device, DeviceClass, FieldValue, ProtocolKind, TelemetrySnapshot};
pub use runtime::{PollerOrchestrator, SnapshotPublisher};
