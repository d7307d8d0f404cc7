//! Service configuration
//!
//! Layered with figment: built-in defaults, then the YAML file, then
//! `TELEMSRV_` environment variables (`__` separates nested keys, e.g.
//! `TELEMSRV_POLLER__RETRY_DELAY_MS=10000`).

use std::path::Path;
use std::time::Duration;

use errors::{config_error, ScadaError, ScadaResult};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::model::{Device, MaintenanceTemplate};

pub const DEFAULT_CONFIG_PATH: &str = "config/telemsrv.yaml";
pub const ENV_PREFIX: &str = "TELEMSRV_";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:6010";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub bind_address: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "telemsrv".to_string(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtdbBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtdbConfig {
    pub backend: RtdbBackend,
    pub redis_url: String,
}

impl Default for RtdbConfig {
    fn default() -> Self {
        Self {
            backend: RtdbBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// SQLite database holding devices, templates and alerts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn url(&self) -> Option<String> {
        self.path
            .as_ref()
            .map(|path| format!("sqlite://{path}?mode=rwc"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub poll_interval_ms: u64,
    pub modbus_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub close_timeout_ms: u64,
    pub inter_frame_delay_ms: u64,
    pub inter_block_delay_ms: u64,
    pub flush_timeout_ms: u64,
    /// Multiplier for consecutive failures, 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    pub max_retry_delay_ms: u64,
    /// Random spread added to each retry delay, 0.0..=1.0
    pub retry_jitter: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            modbus_timeout_ms: 2000,
            retry_delay_ms: 5000,
            close_timeout_ms: 1000,
            inter_frame_delay_ms: 150,
            inter_block_delay_ms: 50,
            flush_timeout_ms: 50,
            backoff_multiplier: 1.0,
            max_retry_delay_ms: 60_000,
            retry_jitter: 0.0,
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub check_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 30,
        }
    }
}

impl MaintenanceConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Log root; `SCADA_LOG_DIR` takes precedence
    pub dir: Option<String>,
    pub enable_file: bool,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            enable_file: true,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub rtdb: RtdbConfig,
    pub database: DatabaseConfig,
    pub poller: PollerConfig,
    pub maintenance: MaintenanceConfig,
    pub logging: LoggingConfig,
    pub demo_mode: bool,
    /// Static device list, used when no database is configured
    pub devices: Vec<Device>,
    /// Static maintenance template, used when no database is configured
    pub maintenance_template: Option<MaintenanceTemplate>,
}

impl AppConfig {
    /// Load defaults, the YAML file (if present) and environment overrides
    pub fn load(path: impl AsRef<Path>) -> ScadaResult<Self> {
        let path = path.as_ref();
        let config: AppConfig = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> ScadaResult<()> {
        if self.service.bind_address.trim().is_empty() {
            return Err(invalid("service.bind_address", "must not be empty"));
        }

        let poller = &self.poller;
        for (field, value) in [
            ("poller.poll_interval_ms", poller.poll_interval_ms),
            ("poller.modbus_timeout_ms", poller.modbus_timeout_ms),
            ("poller.retry_delay_ms", poller.retry_delay_ms),
            ("poller.close_timeout_ms", poller.close_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if poller.backoff_multiplier < 1.0 {
            return Err(invalid("poller.backoff_multiplier", "must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&poller.retry_jitter) {
            return Err(invalid("poller.retry_jitter", "must be within 0.0..=1.0"));
        }

        if self.maintenance.check_interval_secs == 0 {
            return Err(invalid(
                "maintenance.check_interval_secs",
                "must be greater than zero",
            ));
        }

        if self.rtdb.backend == RtdbBackend::Redis && self.rtdb.redis_url.trim().is_empty() {
            return Err(config_error!("rtdb.redis_url is required for the redis backend"));
        }

        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id) {
                return Err(config_error!("duplicate device id {}", device.id));
            }
            validate_device(device)?;
        }

        if let Some(template) = &self.maintenance_template {
            for interval in &template.intervals {
                if interval.hours <= 0.0 {
                    return Err(config_error!(
                        "maintenance interval '{}' must have positive hours",
                        interval.name
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Addressing checks applied to every device before a reader is built
pub fn validate_device(device: &Device) -> ScadaResult<()> {
    if device.host.trim().is_empty() {
        return Err(config_error!("device {} has an empty host", device.id));
    }
    if device.port == 0 {
        return Err(config_error!("device {} has port 0", device.id));
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> ScadaError {
    ScadaError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
