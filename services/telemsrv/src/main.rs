//! Genset Telemetry Service (telemsrv)
//!
//! Modbus acquisition, snapshot publication and maintenance alerting.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use errors::{ScadaError, ScadaResult};
use scada_rtdb::{MemoryRtdb, RedisRtdb, Rtdb, ALERTS_CHANNEL, METRICS_CHANNEL};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use telemsrv::{
    bootstrap::{self, Args},
    config::{AppConfig, RtdbBackend},
    demo::{demo_devices, DemoPublisher},
    gateway::{create_router, spawn_bus_bridge, AppState, WsConnectionManager},
    maintenance::MaintenanceScheduler,
    providers::{
        sqlite, AlertStore, ConfigProvider, MemoryAlertStore, SqliteAlertStore,
        SqliteConfigProvider, StaticConfigProvider,
    },
    runtime::{PollStates, PollerOrchestrator, SnapshotPublisher},
};

#[tokio::main]
async fn main() -> ScadaResult<()> {
    // Parse arguments, load configuration and initialize logging
    let args = Args::parse();
    let config = bootstrap::load_configuration(&args)?;
    bootstrap::initialize_logging(&args, &config)?;

    // Validation mode: validate and exit
    if args.validate {
        bootstrap::validate_configuration(&config)?;
        return Ok(());
    }

    info!("Starting {} service", config.service.name);
    let shutdown = common::shutdown_token();

    let rtdb = connect_rtdb(&config).await?;
    let (provider, alerts) = build_providers(&config).await?;

    // Acquisition: simulated feed in demo mode, device polling otherwise
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let poll_states: PollStates = if config.demo_mode {
        info!("Demo mode enabled, device polling disabled");
        let demo = DemoPublisher::new(
            SnapshotPublisher::new(rtdb.clone()),
            config.poller.poll_interval(),
        );
        tasks.push(tokio::spawn(demo.run(shutdown.child_token())));
        PollStates::default()
    } else {
        let orchestrator = PollerOrchestrator::new(provider.clone(), rtdb.clone(), &config.poller);
        let states = orchestrator.states();
        let token = shutdown.child_token();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = orchestrator.run(token).await {
                error!("Poller orchestrator failed: {}", e);
            }
        }));
        states
    };

    if config.maintenance.enabled {
        let scheduler = MaintenanceScheduler::new(provider.clone(), alerts.clone(), rtdb.clone());
        tasks.push(tokio::spawn(
            scheduler.run(config.maintenance.check_interval(), shutdown.child_token()),
        ));
    } else {
        warn!("Maintenance alerting disabled");
    }

    // Client-facing API
    let ws_manager = Arc::new(WsConnectionManager::new());
    for channel in [METRICS_CHANNEL, ALERTS_CHANNEL] {
        tasks.push(spawn_bus_bridge(
            rtdb.clone(),
            ws_manager.clone(),
            channel,
            shutdown.child_token(),
        ));
    }

    let state = Arc::new(AppState {
        service_name: config.service.name.clone(),
        rtdb: rtdb.clone(),
        alerts,
        ws_manager,
        poll_states,
        demo_mode: config.demo_mode,
        started_at: Instant::now(),
    });
    let app = create_router(state);

    let bind_address = bootstrap::determine_bind_address(args.bind_address.clone(), &config);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| {
            ScadaError::StartupFailed(format!("Failed to bind {}: {}", bind_address, e))
        })?;
    info!("API server listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    let server_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await?;

    // Server returns once the shutdown token fired; wait for the background tasks
    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    info!("{} stopped", config.service.name);
    Ok(())
}

async fn connect_rtdb(config: &AppConfig) -> ScadaResult<Arc<dyn Rtdb>> {
    match config.rtdb.backend {
        RtdbBackend::Memory => {
            info!("Using in-process RTDB");
            Ok(Arc::new(MemoryRtdb::new()))
        },
        RtdbBackend::Redis => {
            let rtdb = RedisRtdb::new(&config.rtdb.redis_url).await.map_err(|e| {
                ScadaError::ConnectionFailed {
                    endpoint: config.rtdb.redis_url.clone(),
                    reason: format!("{e:#}"),
                }
            })?;
            info!("Connected to Redis at {}", config.rtdb.redis_url);
            Ok(Arc::new(rtdb))
        },
    }
}

/// SQLite when a database is configured, otherwise the devices and template
/// from the YAML file (or the demo fleet)
async fn build_providers(
    config: &AppConfig,
) -> ScadaResult<(Arc<dyn ConfigProvider>, Arc<dyn AlertStore>)> {
    if let Some(url) = config.database.url() {
        info!("Loading devices and alerts from {}", url);
        let pool = sqlite::connect(&url).await?;
        return Ok((
            Arc::new(SqliteConfigProvider::new(pool.clone())),
            Arc::new(SqliteAlertStore::new(pool)),
        ));
    }

    let devices = if config.demo_mode && config.devices.is_empty() {
        demo_devices()
    } else {
        config.devices.clone()
    };
    info!("Using {} statically configured device(s)", devices.len());
    Ok((
        Arc::new(StaticConfigProvider::new(
            devices,
            config.maintenance_template.clone(),
        )),
        Arc::new(MemoryAlertStore::new()),
    ))
}
