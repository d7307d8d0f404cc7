//! Key and channel naming

/// Latest-snapshot channel, one message per device poll
pub const METRICS_CHANNEL: &str = "metrics.updates";

/// Maintenance alert lifecycle events
pub const ALERTS_CHANNEL: &str = "maintenance.alerts";

/// Device list reconciliation trigger; payload is ignored
pub const RELOAD_CHANNEL: &str = "poller.reload";

/// Glob matching every device snapshot key
pub const DEVICE_METRICS_PATTERN: &str = "device:*:metrics";

/// `device:{id}:metrics`
pub fn device_metrics_key(device_id: i64) -> String {
    format!("device:{}:metrics", device_id)
}

/// Inverse of [`device_metrics_key`]
pub fn parse_device_metrics_key(key: &str) -> Option<i64> {
    key.strip_prefix("device:")?
        .strip_suffix(":metrics")?
        .parse()
        .ok()
}
