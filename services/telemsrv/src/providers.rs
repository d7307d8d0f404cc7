//! Configuration and persistence backends
//!
//! Devices and the maintenance schedule come from a [`ConfigProvider`],
//! alerts and service history live in an [`AlertStore`]. Both have a SQLite
//! implementation and an in-process one for YAML-only deployments.

pub mod alert_store;
pub mod config_provider;
pub mod sqlite;

// Re-export common types
pub use alert_store::{AlertStore, MemoryAlertStore, NewAlert, ServiceRecord};
pub use config_provider::{ConfigProvider, StaticConfigProvider};
pub use sqlite::{SqliteAlertStore, SqliteConfigProvider};
