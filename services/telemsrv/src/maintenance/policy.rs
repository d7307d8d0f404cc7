//! Threshold policy for maintenance-due alerts

use crate::model::{AlertSeverity, MaintenanceAlert, MaintenanceInterval};

/// Hours remaining at or below which a warning is raised
pub const WARNING_HOURS: f64 = 50.0;
/// Hours remaining at or below which the alert turns critical
pub const CRITICAL_HOURS: f64 = 20.0;
/// Engine-hour drift that forces an update of an unchanged-severity alert
pub const HOURS_DRIFT: f64 = 1.0;

/// First interval not yet reached, or the last one once all are exceeded.
///
/// `intervals` must be sorted by ascending hours.
pub fn next_due_interval(
    intervals: &[MaintenanceInterval],
    hours_since_service: f64,
) -> Option<&MaintenanceInterval> {
    intervals
        .iter()
        .find(|iv| hours_since_service < iv.hours)
        .or_else(|| intervals.last())
}

/// `None` means nothing is due and open alerts should be resolved
pub fn classify(hours_remaining: f64) -> Option<AlertSeverity> {
    if hours_remaining <= 0.0 {
        Some(AlertSeverity::Overdue)
    } else if hours_remaining <= CRITICAL_HOURS {
        Some(AlertSeverity::Critical)
    } else if hours_remaining <= WARNING_HOURS {
        Some(AlertSeverity::Warning)
    } else {
        None
    }
}

pub fn alert_message(
    device_name: &str,
    interval_name: &str,
    hours_remaining: f64,
    engine_hours: f64,
) -> String {
    if hours_remaining <= 0.0 {
        format!(
            "{}: {} overdue by {:.0}h (engine hours: {:.0})",
            device_name,
            interval_name,
            hours_remaining.abs(),
            engine_hours
        )
    } else {
        format!(
            "{}: {:.0}h remaining until {} (engine hours: {:.0})",
            device_name, hours_remaining, interval_name, engine_hours
        )
    }
}

/// Whether an open alert is stale enough to rewrite
pub fn needs_update(alert: &MaintenanceAlert, severity: AlertSeverity, engine_hours: f64) -> bool {
    alert.severity != severity || (alert.engine_hours - engine_hours).abs() >= HOURS_DRIFT
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::model::AlertStatus;
    use chrono::Utc;

    fn intervals() -> Vec<MaintenanceInterval> {
        [(1, "250h Service", 250.0), (2, "500h Service", 500.0), (3, "1000h Overhaul", 1000.0)]
            .into_iter()
            .map(|(id, name, hours)| MaintenanceInterval {
                id,
                name: name.to_string(),
                hours,
            })
            .collect()
    }

    #[test]
    fn test_next_due_interval() {
        let ivs = intervals();
        assert_eq!(next_due_interval(&ivs, 0.0).unwrap().id, 1);
        assert_eq!(next_due_interval(&ivs, 249.9).unwrap().id, 1);
        // Threshold reached moves on to the next interval
        assert_eq!(next_due_interval(&ivs, 250.0).unwrap().id, 2);
        assert_eq!(next_due_interval(&ivs, 999.0).unwrap().id, 3);
        // Everything exceeded sticks to the highest
        assert_eq!(next_due_interval(&ivs, 1400.0).unwrap().id, 3);
        assert!(next_due_interval(&[], 10.0).is_none());
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(50.1), None);
        assert_eq!(classify(50.0), Some(AlertSeverity::Warning));
        assert_eq!(classify(20.1), Some(AlertSeverity::Warning));
        assert_eq!(classify(20.0), Some(AlertSeverity::Critical));
        assert_eq!(classify(0.1), Some(AlertSeverity::Critical));
        assert_eq!(classify(0.0), Some(AlertSeverity::Overdue));
        assert_eq!(classify(-400.0), Some(AlertSeverity::Overdue));
    }

    #[test]
    fn test_alert_message() {
        assert_eq!(
            alert_message("Gen1", "250h Service", 40.0, 210.0),
            "Gen1: 40h remaining until 250h Service (engine hours: 210)"
        );
        assert_eq!(
            alert_message("Gen1", "1000h Overhaul", -12.4, 1012.4),
            "Gen1: 1000h Overhaul overdue by 12h (engine hours: 1012)"
        );
        assert_eq!(
            alert_message("Gen2", "250h Service", 0.0, 250.0),
            "Gen2: 250h Service overdue by 0h (engine hours: 250)"
        );
    }

    #[test]
    fn test_needs_update() {
        let now = Utc::now();
        let alert = MaintenanceAlert {
            id: 1,
            device_id: 1,
            device_name: "Gen1".to_string(),
            site_code: "MKZ".to_string(),
            interval_id: 1,
            interval_name: "250h Service".to_string(),
            interval_hours: 250.0,
            severity: AlertSeverity::Warning,
            status: AlertStatus::Active,
            engine_hours: 210.0,
            hours_remaining: 40.0,
            message: String::new(),
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };

        assert!(!needs_update(&alert, AlertSeverity::Warning, 210.0));
        assert!(!needs_update(&alert, AlertSeverity::Warning, 210.9));
        assert!(needs_update(&alert, AlertSeverity::Warning, 211.0));
        assert!(needs_update(&alert, AlertSeverity::Critical, 210.0));
    }
}
