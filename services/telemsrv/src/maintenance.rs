//! Maintenance-due alerting driven by engine hours

pub mod policy;
pub mod scheduler;

pub use scheduler::{CycleReport, MaintenanceScheduler};
