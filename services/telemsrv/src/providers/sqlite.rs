//! SQLite-backed device configuration and alert storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::alert_store::{AlertStore, NewAlert, ServiceRecord};
use super::config_provider::ConfigProvider;
use crate::error::{Result, TelemetryError};
use crate::model::{
    AlertSeverity, AlertStatus, Device, DeviceClass, MaintenanceAlert, MaintenanceInterval,
    MaintenanceTemplate, ProtocolKind,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sites (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS devices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        site_id INTEGER,
        name TEXT NOT NULL,
        device_type TEXT NOT NULL CHECK(device_type IN ('generator', 'ats')),
        protocol TEXT NOT NULL DEFAULT 'framed_tcp',
        host TEXT NOT NULL,
        port INTEGER NOT NULL DEFAULT 502,
        unit_id INTEGER NOT NULL DEFAULT 1,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        FOREIGN KEY (site_id) REFERENCES sites(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS maintenance_templates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT,
        is_default BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS maintenance_intervals (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        template_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        code TEXT,
        hours REAL NOT NULL,
        sort_order INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (template_id) REFERENCES maintenance_templates(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS maintenance_alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id INTEGER NOT NULL,
        device_name TEXT NOT NULL,
        site_code TEXT NOT NULL DEFAULT '',
        interval_id INTEGER NOT NULL,
        interval_name TEXT NOT NULL,
        interval_hours REAL NOT NULL,
        severity TEXT NOT NULL CHECK(severity IN ('warning', 'critical', 'overdue')),
        status TEXT NOT NULL CHECK(status IN ('active', 'acknowledged', 'resolved')),
        engine_hours REAL NOT NULL,
        hours_remaining REAL NOT NULL,
        message TEXT NOT NULL,
        acknowledged_by TEXT,
        acknowledged_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        resolved_at TEXT
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_open_pair
        ON maintenance_alerts (device_id, interval_id)
        WHERE status IN ('active', 'acknowledged')
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS maintenance_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id INTEGER NOT NULL,
        interval_id INTEGER,
        engine_hours REAL NOT NULL,
        performed_at TEXT NOT NULL,
        performed_by TEXT,
        notes TEXT
    )
    "#,
];

/// Open (creating if needed) the database and ensure the schema exists
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(url)
        .await?;
    init_schema(&pool).await?;
    info!("SQLite database ready: {}", url);
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

type DeviceRow = (i64, String, Option<String>, String, String, String, i64, i64);

fn device_from_row(row: DeviceRow) -> Result<Device> {
    let (id, name, site_code, device_type, protocol, host, port, unit_id) = row;
    let device_class = DeviceClass::parse(&device_type)
        .ok_or_else(|| TelemetryError::config(format!("unknown device_type '{device_type}'")))?;
    let protocol = ProtocolKind::parse(&protocol)
        .ok_or_else(|| TelemetryError::config(format!("unknown protocol '{protocol}'")))?;
    let port = u16::try_from(port)
        .map_err(|_| TelemetryError::config(format!("port {port} out of range")))?;
    let unit_id = u8::try_from(unit_id)
        .map_err(|_| TelemetryError::config(format!("unit_id {unit_id} out of range")))?;

    Ok(Device {
        id,
        name,
        site_code: site_code.unwrap_or_default(),
        device_class,
        protocol,
        host,
        port,
        unit_id,
        active: true,
    })
}

/// Devices and maintenance templates stored in SQLite
pub struct SqliteConfigProvider {
    db: SqlitePool,
}

impl SqliteConfigProvider {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConfigProvider for SqliteConfigProvider {
    async fn list_active_devices(&self) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT d.id, d.name, s.code, d.device_type, d.protocol, d.host, d.port, d.unit_id
            FROM devices d
            LEFT JOIN sites s ON s.id = d.site_id
            WHERE d.is_active = 1
            ORDER BY d.id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut devices = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.0;
            match device_from_row(row) {
                Ok(device) => devices.push(device),
                Err(e) => warn!("Ignoring device {}: {}", id, e),
            }
        }
        debug!("Loaded {} active devices", devices.len());
        Ok(devices)
    }

    async fn get_default_maintenance_template(&self) -> Result<Option<MaintenanceTemplate>> {
        let Some((id, name)) = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, name FROM maintenance_templates WHERE is_default = 1 ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?
        else {
            return Ok(None);
        };

        let intervals = sqlx::query_as::<_, (i64, String, f64)>(
            r#"
            SELECT id, name, hours FROM maintenance_intervals
            WHERE template_id = ?
            ORDER BY sort_order, hours
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(|(id, name, hours)| MaintenanceInterval { id, name, hours })
        .collect();

        Ok(Some(MaintenanceTemplate {
            id,
            name,
            intervals,
        }))
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: i64,
    device_id: i64,
    device_name: String,
    site_code: String,
    interval_id: i64,
    interval_name: String,
    interval_hours: f64,
    severity: String,
    status: String,
    engine_hours: f64,
    hours_remaining: f64,
    message: String,
    acknowledged_by: Option<String>,
    acknowledged_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<AlertRow> for MaintenanceAlert {
    type Error = TelemetryError;

    fn try_from(row: AlertRow) -> Result<Self> {
        let severity = AlertSeverity::parse(&row.severity).ok_or_else(|| {
            TelemetryError::storage(format!("alert {}: bad severity '{}'", row.id, row.severity))
        })?;
        let status = AlertStatus::parse(&row.status).ok_or_else(|| {
            TelemetryError::storage(format!("alert {}: bad status '{}'", row.id, row.status))
        })?;

        Ok(MaintenanceAlert {
            id: row.id,
            device_id: row.device_id,
            device_name: row.device_name,
            site_code: row.site_code,
            interval_id: row.interval_id,
            interval_name: row.interval_name,
            interval_hours: row.interval_hours,
            severity,
            status,
            engine_hours: row.engine_hours,
            hours_remaining: row.hours_remaining,
            message: row.message,
            acknowledged_by: row.acknowledged_by,
            acknowledged_at: row.acknowledged_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            resolved_at: row.resolved_at,
        })
    }
}

const ALERT_COLUMNS: &str = "id, device_id, device_name, site_code, interval_id, interval_name, \
     interval_hours, severity, status, engine_hours, hours_remaining, message, acknowledged_by, \
     acknowledged_at, created_at, updated_at, resolved_at";

/// Alert rows and service history stored in SQLite.
///
/// Writers take `write_lock` so a find-then-create from one check cycle
/// never interleaves with another writer.
pub struct SqliteAlertStore {
    db: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteAlertStore {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    async fn fetch(&self, id: i64) -> Result<MaintenanceAlert> {
        let row = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM maintenance_alerts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| TelemetryError::storage(format!("alert {id} not found")))?;
        row.try_into()
    }
}

#[async_trait]
impl AlertStore for SqliteAlertStore {
    async fn find_active(
        &self,
        device_id: i64,
        interval_id: i64,
    ) -> Result<Option<MaintenanceAlert>> {
        sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM maintenance_alerts \
             WHERE device_id = ? AND interval_id = ? AND status IN ('active', 'acknowledged') \
             LIMIT 1"
        ))
        .bind(device_id)
        .bind(interval_id)
        .fetch_optional(&self.db)
        .await?
        .map(MaintenanceAlert::try_from)
        .transpose()
    }

    async fn create(&self, alert: NewAlert) -> Result<MaintenanceAlert> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO maintenance_alerts (
                device_id, device_name, site_code, interval_id, interval_name, interval_hours,
                severity, status, engine_hours, hours_remaining, message, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'active', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.device_id)
        .bind(&alert.device_name)
        .bind(&alert.site_code)
        .bind(alert.interval_id)
        .bind(&alert.interval_name)
        .bind(alert.interval_hours)
        .bind(alert.severity.as_str())
        .bind(alert.engine_hours)
        .bind(alert.hours_remaining)
        .bind(&alert.message)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.fetch(result.last_insert_rowid()).await
    }

    async fn update(&self, alert: &MaintenanceAlert) -> Result<MaintenanceAlert> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            UPDATE maintenance_alerts
            SET severity = ?, engine_hours = ?, hours_remaining = ?, message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(alert.severity.as_str())
        .bind(alert.engine_hours)
        .bind(alert.hours_remaining)
        .bind(&alert.message)
        .bind(Utc::now())
        .bind(alert.id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TelemetryError::storage(format!("alert {} not found", alert.id)));
        }
        self.fetch(alert.id).await
    }

    async fn resolve_all_active(&self, device_id: i64) -> Result<Vec<MaintenanceAlert>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.begin().await?;

        let ids: Vec<i64> = sqlx::query_as::<_, (i64,)>(
            "SELECT id FROM maintenance_alerts \
             WHERE device_id = ? AND status IN ('active', 'acknowledged') ORDER BY id",
        )
        .bind(device_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(id,)| id)
        .collect();

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE maintenance_alerts SET status = 'resolved', resolved_at = ?, updated_at = ? \
             WHERE device_id = ? AND status IN ('active', 'acknowledged')",
        )
        .bind(now)
        .bind(now)
        .bind(device_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            resolved.push(self.fetch(id).await?);
        }
        Ok(resolved)
    }

    async fn last_serviced_hours(&self, device_id: i64) -> Result<f64> {
        let hours = sqlx::query_as::<_, (f64,)>(
            "SELECT engine_hours FROM maintenance_logs WHERE device_id = ? \
             ORDER BY performed_at DESC, id DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(hours.map(|(h,)| h).unwrap_or(0.0))
    }

    async fn list_open(&self, device_id: Option<i64>) -> Result<Vec<MaintenanceAlert>> {
        sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM maintenance_alerts \
             WHERE status IN ('active', 'acknowledged') AND (? IS NULL OR device_id = ?) \
             ORDER BY updated_at DESC, id DESC"
        ))
        .bind(device_id)
        .bind(device_id)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(MaintenanceAlert::try_from)
        .collect()
    }

    async fn acknowledge(&self, alert_id: i64, by: &str) -> Result<Option<MaintenanceAlert>> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE maintenance_alerts \
             SET status = 'acknowledged', acknowledged_by = ?, acknowledged_at = ?, updated_at = ? \
             WHERE id = ? AND status = 'active'",
        )
        .bind(by)
        .bind(now)
        .bind(now)
        .bind(alert_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.fetch(alert_id).await.map(Some)
    }

    async fn record_service(
        &self,
        device_id: i64,
        interval_id: Option<i64>,
        engine_hours: f64,
        performed_by: Option<&str>,
    ) -> Result<ServiceRecord> {
        let performed_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO maintenance_logs (device_id, interval_id, engine_hours, performed_at, performed_by) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(device_id)
        .bind(interval_id)
        .bind(engine_hours)
        .bind(performed_at)
        .bind(performed_by)
        .execute(&self.db)
        .await?;

        Ok(ServiceRecord {
            id: result.last_insert_rowid(),
            device_id,
            interval_id,
            engine_hours,
            performed_at,
            performed_by: performed_by.map(str::to_string),
            notes: None,
        })
    }
}
