//! Realtime store and pub/sub bus for genset telemetry
//!
//! Provides a unified interface over the latest-value store and the
//! broadcast channels, with two backends:
//!
//! - **MemoryRtdb**: DashMap + tokio broadcast, single-process deployments and tests
//! - **RedisRtdb**: Redis strings + Redis Pub/Sub

pub mod keyspace;
pub mod memory_impl;
pub mod traits;

#[cfg(feature = "redis-backend")]
pub mod redis_impl;

// Re-exports
pub use bytes::Bytes;
pub use keyspace::{
    device_metrics_key, parse_device_metrics_key, ALERTS_CHANNEL, DEVICE_METRICS_PATTERN,
    METRICS_CHANNEL, RELOAD_CHANNEL,
};
pub use memory_impl::{MemoryRtdb, MemoryStats};
pub use traits::{MessageStream, Rtdb};

#[cfg(feature = "redis-backend")]
pub use redis_impl::RedisRtdb;
