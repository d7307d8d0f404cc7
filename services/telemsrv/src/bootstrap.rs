//! Service bootstrap and initialization
//!
//! This module handles:
//! - Command-line arguments
//! - Logging configuration
//! - Configuration loading and validation

use std::path::PathBuf;

use clap::Parser;
use errors::ScadaResult;
use tracing::{info, warn};

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};

pub const SERVICE_NAME: &str = "telemsrv";

/// Command-line arguments for telemsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "telemsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Genset Telemetry Acquisition Service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML)
    #[arg(short = 'c', long, env = "TELEMSRV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Bind address for the API server
    #[arg(short = 'b', long)]
    pub bind_address: Option<String>,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,

    /// Publish simulated telemetry instead of polling devices
    #[arg(long)]
    pub demo: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Load the layered configuration and fold in command-line overrides
pub fn load_configuration(args: &Args) -> ScadaResult<AppConfig> {
    let mut config = AppConfig::load(&args.config)?;
    if args.demo {
        config.demo_mode = true;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

/// Initialize logging from the effective configuration.
///
/// Log root directory priority:
/// 1. SCADA_LOG_DIR environment variable
/// 2. `logging.dir` from the configuration
/// 3. Default "logs"
pub fn initialize_logging(args: &Args, config: &AppConfig) -> ScadaResult<()> {
    common::logging::init_log_root(config.logging.dir.as_deref());
    let log_dir = common::logging::get_log_root().join(SERVICE_NAME);

    let log_config = common::LogConfig {
        service_name: SERVICE_NAME.to_string(),
        log_dir,
        console_level: common::parse_level(&config.logging.level),
        enable_file: config.logging.enable_file,
        enable_json: config.logging.json,
        ansi: !args.no_color,
    };
    common::init_with_config(log_config)
}

/// Print what the configuration describes; errors were already raised by
/// `AppConfig::load`
pub fn validate_configuration(config: &AppConfig) -> ScadaResult<()> {
    info!("Service: {}", config.service.name);
    info!("RTDB backend: {:?}", config.rtdb.backend);

    match &config.database.path {
        Some(path) => info!("Devices and alerts from SQLite: {}", path),
        None => {
            info!("Found {} static device(s)", config.devices.len());
            for device in &config.devices {
                info!(
                    "  Device {}: {} [{}] at {} (unit {}, {})",
                    device.id,
                    device.name,
                    device.device_class,
                    device.endpoint(),
                    device.unit_id,
                    device.protocol
                );
            }
            match &config.maintenance_template {
                Some(template) => info!(
                    "Maintenance template '{}' with {} interval(s)",
                    template.name,
                    template.intervals.len()
                ),
                None => warn!("No maintenance template configured"),
            }
        },
    }

    info!("Configuration validation completed successfully");
    Ok(())
}

/// Priority: CLI > config
pub fn determine_bind_address(cli_arg: Option<String>, config: &AppConfig) -> String {
    if let Some(addr) = cli_arg {
        info!("Using bind address from command line: {}", addr);
        return addr;
    }
    config.service.bind_address.clone()
}
