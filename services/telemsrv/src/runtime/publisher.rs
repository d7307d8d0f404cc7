//! Snapshot publication to the store and the metrics channel

use std::sync::Arc;

use bytes::Bytes;
use scada_rtdb::{device_metrics_key, Rtdb, METRICS_CHANNEL};
use tracing::debug;

use crate::error::{Result, TelemetryError};
use crate::model::TelemetrySnapshot;

/// Writes the latest snapshot of a device, then announces it.
///
/// The store write always lands before the publish so a subscriber that
/// reads the key after a notification never sees an older snapshot.
#[derive(Clone)]
pub struct SnapshotPublisher {
    rtdb: Arc<dyn Rtdb>,
}

impl SnapshotPublisher {
    pub fn new(rtdb: Arc<dyn Rtdb>) -> Self {
        Self { rtdb }
    }

    pub async fn publish(&self, snapshot: &TelemetrySnapshot) -> Result<u32> {
        let payload = serde_json::to_string(snapshot)?;
        let key = device_metrics_key(snapshot.device_id);

        let receivers = self
            .rtdb
            .set_and_publish(&key, Bytes::from(payload), METRICS_CHANNEL)
            .await
            .map_err(|e| TelemetryError::storage(format!("publish {key}: {e:#}")))?;

        debug!(
            "Published snapshot for device {} (online={}, {} subscribers)",
            snapshot.device_id, snapshot.online, receivers
        );
        Ok(receivers)
    }

    /// Latest stored snapshot of a device, if any
    pub async fn latest(&self, device_id: i64) -> Result<Option<TelemetrySnapshot>> {
        let key = device_metrics_key(device_id);
        let Some(raw) = self
            .rtdb
            .get(&key)
            .await
            .map_err(|e| TelemetryError::storage(format!("get {key}: {e:#}")))?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Remove a device's snapshot once it is no longer polled
    pub async fn forget(&self, device_id: i64) -> Result<()> {
        let key = device_metrics_key(device_id);
        self.rtdb
            .del(&key)
            .await
            .map_err(|e| TelemetryError::storage(format!("del {key}: {e:#}")))?;
        Ok(())
    }
}
