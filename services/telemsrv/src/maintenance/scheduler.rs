//! Periodic maintenance-due evaluation
//!
//! Every cycle reads the current engine hours of each active generator from
//! the realtime store, compares the hours since its last service against the
//! default template and creates, updates or resolves alerts accordingly.
//! Each lifecycle change is announced on the alerts channel.

use std::sync::Arc;
use std::time::Duration;

use scada_rtdb::{Rtdb, ALERTS_CHANNEL};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::policy::{alert_message, classify, needs_update, next_due_interval};
use crate::error::{Result, TelemetryError};
use crate::model::{
    AlertAction, AlertEvent, Device, DeviceClass, MaintenanceAlert, MaintenanceInterval,
};
use crate::providers::{AlertStore, ConfigProvider, NewAlert};
use crate::runtime::SnapshotPublisher;

/// Counters for one evaluation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub checked: usize,
    pub skipped: usize,
    pub created: usize,
    pub updated: usize,
    pub resolved: usize,
}

pub struct MaintenanceScheduler {
    provider: Arc<dyn ConfigProvider>,
    store: Arc<dyn AlertStore>,
    rtdb: Arc<dyn Rtdb>,
    snapshots: SnapshotPublisher,
}

impl MaintenanceScheduler {
    pub fn new(
        provider: Arc<dyn ConfigProvider>,
        store: Arc<dyn AlertStore>,
        rtdb: Arc<dyn Rtdb>,
    ) -> Self {
        Self {
            provider,
            store,
            snapshots: SnapshotPublisher::new(rtdb.clone()),
            rtdb,
        }
    }

    /// Evaluate every active generator once
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let Some(template) = self.provider.get_default_maintenance_template().await? else {
            debug!("No default maintenance template, skipping check");
            return Ok(report);
        };
        let intervals = template.sorted_intervals();
        if intervals.is_empty() {
            debug!("Template '{}' has no intervals, skipping check", template.name);
            return Ok(report);
        }

        let devices = self.provider.list_active_devices().await?;
        for device in devices
            .iter()
            .filter(|d| d.device_class == DeviceClass::Generator)
        {
            match self.check_device(device, &intervals, &mut report).await {
                Ok(true) => report.checked += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.skipped += 1;
                    error!("Maintenance check failed for device {}: {}", device.id, e);
                },
            }
        }

        debug!(
            "Maintenance cycle: {} checked, {} skipped, {} created, {} updated, {} resolved",
            report.checked, report.skipped, report.created, report.updated, report.resolved
        );
        Ok(report)
    }

    /// Returns false when the device had no usable engine hours
    async fn check_device(
        &self,
        device: &Device,
        intervals: &[MaintenanceInterval],
        report: &mut CycleReport,
    ) -> Result<bool> {
        let snapshot = match self.snapshots.latest(device.id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!("Device {}: unreadable snapshot: {}", device.id, e);
                return Ok(false);
            },
        };
        let Some(engine_hours) = snapshot.engine_hours() else {
            return Ok(false);
        };

        let last_service = self.store.last_serviced_hours(device.id).await?;
        let since_service = engine_hours - last_service;
        let Some(due) = next_due_interval(intervals, since_service) else {
            return Ok(false);
        };
        let remaining = due.hours - since_service;

        let Some(severity) = classify(remaining) else {
            for alert in self.store.resolve_all_active(device.id).await? {
                info!(
                    "Resolved maintenance alert {} for {} ({})",
                    alert.id, device.name, alert.interval_name
                );
                self.announce(AlertAction::Resolved, alert).await;
                report.resolved += 1;
            }
            return Ok(true);
        };

        let message = alert_message(&device.name, &due.name, remaining, engine_hours);
        match self.store.find_active(device.id, due.id).await? {
            Some(mut alert) => {
                if needs_update(&alert, severity, engine_hours) {
                    alert.severity = severity;
                    alert.engine_hours = engine_hours;
                    alert.hours_remaining = remaining;
                    alert.message = message;
                    let updated = self.store.update(&alert).await?;
                    info!("Updated maintenance alert {}: {}", updated.id, updated.message);
                    self.announce(AlertAction::Updated, updated).await;
                    report.updated += 1;
                }
            },
            None => {
                let created = self
                    .store
                    .create(NewAlert {
                        device_id: device.id,
                        device_name: device.name.clone(),
                        site_code: device.site_code.clone(),
                        interval_id: due.id,
                        interval_name: due.name.clone(),
                        interval_hours: due.hours,
                        severity,
                        engine_hours,
                        hours_remaining: remaining,
                        message,
                    })
                    .await?;
                info!(
                    "Created {} maintenance alert {}: {}",
                    created.severity.as_str(),
                    created.id,
                    created.message
                );
                self.announce(AlertAction::Created, created).await;
                report.created += 1;
            },
        }
        Ok(true)
    }

    async fn announce(&self, action: AlertAction, alert: MaintenanceAlert) {
        let alert_id = alert.id;
        if let Err(e) = self.publish_event(AlertEvent::new(action, alert)).await {
            warn!("Failed to publish event for alert {}: {}", alert_id, e);
        }
    }

    async fn publish_event(&self, event: AlertEvent) -> Result<u32> {
        let payload = serde_json::to_string(&event)?;
        self.rtdb
            .publish(ALERTS_CHANNEL, &payload)
            .await
            .map_err(|e| TelemetryError::storage(format!("publish {ALERTS_CHANNEL}: {e:#}")))
    }

    /// Run a cycle every `period` until `shutdown` fires
    pub async fn run(self, period: Duration, shutdown: CancellationToken) {
        info!("Maintenance scheduler started (every {:?})", period);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("Maintenance check error: {}", e);
                    }
                },
            }
        }
        info!("Maintenance scheduler stopped");
    }
}
