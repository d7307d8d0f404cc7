//! Core data model shared by the pollers, the scheduler and the gateway

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODBUS_PORT: u16 = 502;
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Register layout family of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    #[serde(rename = "generator")]
    Generator,
    #[serde(rename = "ats", alias = "transfer_switch")]
    TransferSwitch,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Generator => "generator",
            DeviceClass::TransferSwitch => "ats",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "generator" => Some(DeviceClass::Generator),
            "ats" | "transfer_switch" => Some(DeviceClass::TransferSwitch),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire transport used to reach a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// Modbus-TCP with MBAP framing
    #[serde(alias = "modbus_tcp", alias = "tcp")]
    FramedTcp,
    /// Raw RTU frames tunnelled through a serial-to-Ethernet bridge
    #[serde(alias = "rtu", alias = "rtu_tcp")]
    RtuOverTcp,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::FramedTcp => "framed_tcp",
            ProtocolKind::RtuOverTcp => "rtu_over_tcp",
        }
    }

    /// Parse the protocol tag stored by the configuration database
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "framed_tcp" | "modbus_tcp" | "tcp" => Some(ProtocolKind::FramedTcp),
            "rtu_over_tcp" | "rtu_tcp" | "rtu" => Some(ProtocolKind::RtuOverTcp),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_port() -> u16 {
    DEFAULT_MODBUS_PORT
}

fn default_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}

fn default_true() -> bool {
    true
}

/// A polled controller as handed out by the configuration provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub site_code: String,
    #[serde(rename = "device_type")]
    pub device_class: DeviceClass,
    pub protocol: ProtocolKind,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Device {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True when a running reader for `self` can keep serving `other`.
    ///
    /// Any difference in addressing, transport or register layout forces
    /// the reader to be replaced.
    pub fn same_wiring(&self, other: &Device) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.unit_id == other.unit_id
            && self.protocol == other.protocol
            && self.device_class == other.device_class
    }
}

/// A single decoded register value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// Decoded fields of one poll; `None` means the controller reported "no data"
pub type FieldMap = BTreeMap<String, Option<FieldValue>>;

/// Field carrying cumulative engine run hours
pub const ENGINE_HOURS_FIELD: &str = "run_hours";

/// One poll result for one device, immutable once published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub device_id: i64,
    #[serde(default)]
    pub site_code: String,
    pub device_type: DeviceClass,
    pub timestamp: DateTime<Utc>,
    pub online: bool,
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: FieldMap,
}

impl TelemetrySnapshot {
    pub fn online(device: &Device, fields: FieldMap) -> Self {
        Self {
            device_id: device.id,
            site_code: device.site_code.clone(),
            device_type: device.device_class,
            timestamp: Utc::now(),
            online: true,
            error: None,
            fields,
        }
    }

    pub fn offline(device: &Device, error: impl Into<String>) -> Self {
        Self {
            device_id: device.id,
            site_code: device.site_code.clone(),
            device_type: device.device_class,
            timestamp: Utc::now(),
            online: false,
            error: Some(error.into()),
            fields: FieldMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).and_then(Option::as_ref)
    }

    /// Current engine hours, only when the device is online and reports them
    pub fn engine_hours(&self) -> Option<f64> {
        if !self.online {
            return None;
        }
        self.field(ENGINE_HOURS_FIELD).and_then(FieldValue::as_f64)
    }
}

// ============================================================================
// Maintenance
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceInterval {
    pub id: i64,
    pub name: String,
    pub hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceTemplate {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub intervals: Vec<MaintenanceInterval>,
}

impl MaintenanceTemplate {
    /// Intervals ordered by ascending hour threshold
    pub fn sorted_intervals(&self) -> Vec<MaintenanceInterval> {
        let mut intervals = self.intervals.clone();
        intervals.sort_by(|a, b| a.hours.total_cmp(&b.hours));
        intervals
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
    Overdue,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
            AlertSeverity::Overdue => "overdue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warning" => Some(AlertSeverity::Warning),
            "critical" => Some(AlertSeverity::Critical),
            "overdue" => Some(AlertSeverity::Overdue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AlertStatus::Active),
            "acknowledged" => Some(AlertStatus::Acknowledged),
            "resolved" => Some(AlertStatus::Resolved),
            _ => None,
        }
    }

    /// Still open from the operator's point of view
    pub fn is_open(&self) -> bool {
        matches!(self, AlertStatus::Active | AlertStatus::Acknowledged)
    }
}

/// Maintenance-due alert, one open row per (device, interval)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceAlert {
    pub id: i64,
    pub device_id: i64,
    pub device_name: String,
    pub site_code: String,
    pub interval_id: i64,
    pub interval_name: String,
    pub interval_hours: f64,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub engine_hours: f64,
    pub hours_remaining: f64,
    pub message: String,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertAction {
    Created,
    Updated,
    Resolved,
}

pub const ALERT_EVENT_TYPE: &str = "maintenance_alert";

/// Message published on the alerts channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub action: AlertAction,
    pub alert: MaintenanceAlert,
}

impl AlertEvent {
    pub fn new(action: AlertAction, alert: MaintenanceAlert) -> Self {
        Self {
            event_type: ALERT_EVENT_TYPE.to_string(),
            action,
            alert,
        }
    }
}
