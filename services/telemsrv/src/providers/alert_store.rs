//! Maintenance alert persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};
use crate::model::{AlertSeverity, AlertStatus, MaintenanceAlert};

/// Alert fields chosen by the scheduler; the store assigns id, status and
/// timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub device_id: i64,
    pub device_name: String,
    pub site_code: String,
    pub interval_id: i64,
    pub interval_name: String,
    pub interval_hours: f64,
    pub severity: AlertSeverity,
    pub engine_hours: f64,
    pub hours_remaining: f64,
    pub message: String,
}

/// A completed maintenance, the reference point for hours-since-service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: i64,
    pub device_id: i64,
    pub interval_id: Option<i64>,
    pub engine_hours: f64,
    pub performed_at: DateTime<Utc>,
    pub performed_by: Option<String>,
    pub notes: Option<String>,
}

/// Alert persistence.
///
/// At most one open (active or acknowledged) alert exists per
/// (device, interval); implementations reject a `create` that would break
/// this and serialize their read-modify-write cycles.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// The open alert for this device and interval
    async fn find_active(&self, device_id: i64, interval_id: i64)
        -> Result<Option<MaintenanceAlert>>;

    async fn create(&self, alert: NewAlert) -> Result<MaintenanceAlert>;

    /// Persist severity, hours and message of an existing alert
    async fn update(&self, alert: &MaintenanceAlert) -> Result<MaintenanceAlert>;

    /// Resolve every open alert of a device, returning the resolved rows
    async fn resolve_all_active(&self, device_id: i64) -> Result<Vec<MaintenanceAlert>>;

    /// Engine hours at the most recent service, 0.0 when never serviced
    async fn last_serviced_hours(&self, device_id: i64) -> Result<f64>;

    /// Open alerts, newest first, optionally for a single device
    async fn list_open(&self, device_id: Option<i64>) -> Result<Vec<MaintenanceAlert>>;

    /// Move an active alert to acknowledged; `None` when no active alert
    /// has this id
    async fn acknowledge(&self, alert_id: i64, by: &str) -> Result<Option<MaintenanceAlert>>;

    async fn record_service(
        &self,
        device_id: i64,
        interval_id: Option<i64>,
        engine_hours: f64,
        performed_by: Option<&str>,
    ) -> Result<ServiceRecord>;
}

/// Drop the oldest resolved alerts beyond `keep`; rows are in creation order
fn prune_resolved(alerts: &mut Vec<MaintenanceAlert>, keep: usize) {
    let resolved = alerts
        .iter()
        .filter(|a| a.status == AlertStatus::Resolved)
        .count();
    let mut excess = resolved.saturating_sub(keep);
    if excess == 0 {
        return;
    }
    alerts.retain(|a| {
        if excess > 0 && a.status == AlertStatus::Resolved {
            excess -= 1;
            false
        } else {
            true
        }
    });
}

#[derive(Debug, Default)]
struct MemoryState {
    alerts: Vec<MaintenanceAlert>,
    services: Vec<ServiceRecord>,
    next_alert_id: i64,
    next_service_id: i64,
}

/// Resolved alerts kept by [`MemoryAlertStore`] before the oldest are dropped
pub const DEFAULT_RESOLVED_HISTORY: usize = 256;

/// In-process alert store used when no database is configured.
///
/// Open alerts are always kept; only the most recent `resolved_history`
/// resolved alerts are retained.
#[derive(Debug)]
pub struct MemoryAlertStore {
    state: Mutex<MemoryState>,
    resolved_history: usize,
}

impl Default for MemoryAlertStore {
    fn default() -> Self {
        Self::with_resolved_history(DEFAULT_RESOLVED_HISTORY)
    }
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolved_history(resolved_history: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            resolved_history,
        }
    }

    /// Every retained alert row, including resolved history
    pub fn all_alerts(&self) -> Vec<MaintenanceAlert> {
        self.state.lock().alerts.clone()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn find_active(
        &self,
        device_id: i64,
        interval_id: i64,
    ) -> Result<Option<MaintenanceAlert>> {
        let state = self.state.lock();
        Ok(state
            .alerts
            .iter()
            .find(|a| a.device_id == device_id && a.interval_id == interval_id && a.status.is_open())
            .cloned())
    }

    async fn create(&self, alert: NewAlert) -> Result<MaintenanceAlert> {
        let mut state = self.state.lock();
        if state.alerts.iter().any(|a| {
            a.device_id == alert.device_id && a.interval_id == alert.interval_id && a.status.is_open()
        }) {
            return Err(TelemetryError::storage(format!(
                "open alert already exists for device {} interval {}",
                alert.device_id, alert.interval_id
            )));
        }

        state.next_alert_id += 1;
        let now = Utc::now();
        let created = MaintenanceAlert {
            id: state.next_alert_id,
            device_id: alert.device_id,
            device_name: alert.device_name,
            site_code: alert.site_code,
            interval_id: alert.interval_id,
            interval_name: alert.interval_name,
            interval_hours: alert.interval_hours,
            severity: alert.severity,
            status: AlertStatus::Active,
            engine_hours: alert.engine_hours,
            hours_remaining: alert.hours_remaining,
            message: alert.message,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };
        state.alerts.push(created.clone());
        Ok(created)
    }

    async fn update(&self, alert: &MaintenanceAlert) -> Result<MaintenanceAlert> {
        let mut state = self.state.lock();
        let stored = state
            .alerts
            .iter_mut()
            .find(|a| a.id == alert.id)
            .ok_or_else(|| TelemetryError::storage(format!("alert {} not found", alert.id)))?;

        stored.severity = alert.severity;
        stored.engine_hours = alert.engine_hours;
        stored.hours_remaining = alert.hours_remaining;
        stored.message = alert.message.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn resolve_all_active(&self, device_id: i64) -> Result<Vec<MaintenanceAlert>> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let mut resolved = Vec::new();
        for alert in state
            .alerts
            .iter_mut()
            .filter(|a| a.device_id == device_id && a.status.is_open())
        {
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(now);
            alert.updated_at = now;
            resolved.push(alert.clone());
        }
        prune_resolved(&mut state.alerts, self.resolved_history);
        Ok(resolved)
    }

    async fn last_serviced_hours(&self, device_id: i64) -> Result<f64> {
        let state = self.state.lock();
        Ok(state
            .services
            .iter()
            .filter(|s| s.device_id == device_id)
            .max_by_key(|s| (s.performed_at, s.id))
            .map(|s| s.engine_hours)
            .unwrap_or(0.0))
    }

    async fn list_open(&self, device_id: Option<i64>) -> Result<Vec<MaintenanceAlert>> {
        let state = self.state.lock();
        let mut open: Vec<MaintenanceAlert> = state
            .alerts
            .iter()
            .filter(|a| a.status.is_open() && device_id.map_or(true, |id| a.device_id == id))
            .cloned()
            .collect();
        open.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(open)
    }

    async fn acknowledge(&self, alert_id: i64, by: &str) -> Result<Option<MaintenanceAlert>> {
        let mut state = self.state.lock();
        let Some(alert) = state
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id && a.status == AlertStatus::Active)
        else {
            return Ok(None);
        };
        let now = Utc::now();
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_by = Some(by.to_string());
        alert.acknowledged_at = Some(now);
        alert.updated_at = now;
        Ok(Some(alert.clone()))
    }

    async fn record_service(
        &self,
        device_id: i64,
        interval_id: Option<i64>,
        engine_hours: f64,
        performed_by: Option<&str>,
    ) -> Result<ServiceRecord> {
        let mut state = self.state.lock();
        state.next_service_id += 1;
        let record = ServiceRecord {
            id: state.next_service_id,
            device_id,
            interval_id,
            engine_hours,
            performed_at: Utc::now(),
            performed_by: performed_by.map(str::to_string),
            notes: None,
        };
        state.services.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn new_alert(device_id: i64, interval_id: i64) -> NewAlert {
        NewAlert {
            device_id,
            device_name: format!("Gen{device_id}"),
            site_code: "MKZ".to_string(),
            interval_id,
            interval_name: "250h Service".to_string(),
            interval_hours: 250.0,
            severity: AlertSeverity::Warning,
            engine_hours: 210.0,
            hours_remaining: 40.0,
            message: "Gen1: 40h remaining until 250h Service (engine hours: 210)".to_string(),
        }
    }

    #[tokio::test]
    async fn test_single_open_alert_per_pair() {
        let store = MemoryAlertStore::new();
        let created = store.create(new_alert(1, 1)).await.unwrap();
        assert_eq!(created.status, AlertStatus::Active);
        assert!(store.create(new_alert(1, 1)).await.is_err());

        // Acknowledged still counts as open
        store.acknowledge(created.id, "operator").await.unwrap();
        let open = store.find_active(1, 1).await.unwrap().unwrap();
        assert_eq!(open.status, AlertStatus::Acknowledged);
        assert!(store.create(new_alert(1, 1)).await.is_err());

        // Other pairs are independent
        store.create(new_alert(1, 2)).await.unwrap();
        store.create(new_alert(2, 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_all_active_only_touches_device() {
        let store = MemoryAlertStore::new();
        store.create(new_alert(1, 1)).await.unwrap();
        store.create(new_alert(1, 2)).await.unwrap();
        store.create(new_alert(2, 1)).await.unwrap();

        assert_eq!(store.list_open(None).await.unwrap().len(), 3);
        assert_eq!(store.list_open(Some(1)).await.unwrap().len(), 2);

        let resolved = store.resolve_all_active(1).await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(store.list_open(Some(1)).await.unwrap().is_empty());
        assert!(resolved.iter().all(|a| a.status == AlertStatus::Resolved));
        assert!(store.find_active(1, 1).await.unwrap().is_none());
        assert!(store.find_active(2, 1).await.unwrap().is_some());

        // A resolved pair may open again
        store.create(new_alert(1, 1)).await.unwrap();
        assert_eq!(store.all_alerts().len(), 4);
    }

    #[tokio::test]
    async fn test_resolved_history_is_bounded() {
        let store = MemoryAlertStore::with_resolved_history(2);
        for _ in 0..4 {
            store.create(new_alert(1, 1)).await.unwrap();
            store.resolve_all_active(1).await.unwrap();
        }
        let open = store.create(new_alert(2, 1)).await.unwrap();

        let alerts = store.all_alerts();
        let resolved_ids: Vec<i64> = alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Resolved)
            .map(|a| a.id)
            .collect();
        assert_eq!(resolved_ids, vec![3, 4]);
        assert!(alerts.iter().any(|a| a.id == open.id));

        // Open alerts survive pruning triggered by another device
        store.create(new_alert(3, 1)).await.unwrap();
        store.resolve_all_active(3).await.unwrap();
        assert!(store.find_active(2, 1).await.unwrap().is_some());
        assert_eq!(store.all_alerts().len(), 3);
    }

    #[tokio::test]
    async fn test_last_serviced_hours() {
        let store = MemoryAlertStore::new();
        assert_eq!(store.last_serviced_hours(1).await.unwrap(), 0.0);

        store.record_service(1, Some(1), 250.0, Some("tech")).await.unwrap();
        store.record_service(1, Some(2), 498.0, None).await.unwrap();
        store.record_service(2, None, 1000.0, None).await.unwrap();
        assert_eq!(store.last_serviced_hours(1).await.unwrap(), 498.0);
    }

    #[tokio::test]
    async fn test_update_missing_alert_fails() {
        let store = MemoryAlertStore::new();
        let mut alert = store.create(new_alert(1, 1)).await.unwrap();
        alert.id = 99;
        assert!(store.update(&alert).await.is_err());
    }
}
