//! HTTP routes: health, WebSocket feed and alert operations

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use errors::{ScadaError, ScadaResult};
use scada_rtdb::Rtdb;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::websocket::{ws_handler, WsConnectionManager};
use crate::model::{AlertSeverity, MaintenanceAlert};
use crate::providers::{AlertStore, ServiceRecord};
use crate::runtime::{PollState, PollStates};

/// Shared state of all HTTP handlers
pub struct AppState {
    pub service_name: String,
    pub rtdb: Arc<dyn Rtdb>,
    pub alerts: Arc<dyn AlertStore>,
    pub ws_manager: Arc<WsConnectionManager>,
    pub poll_states: PollStates,
    pub demo_mode: bool,
    pub started_at: Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/metrics", get(ws_handler))
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/summary", get(alerts_summary))
        .route("/api/alerts/{id}/acknowledge", patch(acknowledge_alert))
        .route("/api/devices/{id}/maintenance", post(record_maintenance))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub uptime_seconds: u64,
    pub demo_mode: bool,
    pub ws_clients: usize,
    pub devices_total: usize,
    pub devices_online: usize,
    pub devices: Vec<PollState>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut devices: Vec<PollState> = state
        .poll_states
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    devices.sort_by_key(|d| d.device_id);
    let devices_online = devices.iter().filter(|d| d.online).count();

    // Degraded while some polled device is unreachable
    let status = if devices_online < devices.len() {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status,
        service: state.service_name.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        demo_mode: state.demo_mode,
        ws_clients: state.ws_manager.count().await,
        devices_total: devices.len(),
        devices_online,
        devices,
    })
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub device_id: Option<i64>,
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertQuery>,
) -> ScadaResult<Json<Vec<MaintenanceAlert>>> {
    Ok(Json(state.alerts.list_open(query.device_id).await?))
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub warning: usize,
    pub critical: usize,
    pub overdue: usize,
    pub total: usize,
}

async fn alerts_summary(State(state): State<Arc<AppState>>) -> ScadaResult<Json<AlertSummary>> {
    let mut summary = AlertSummary::default();
    for alert in state.alerts.list_open(None).await? {
        match alert.severity {
            AlertSeverity::Warning => summary.warning += 1,
            AlertSeverity::Critical => summary.critical += 1,
            AlertSeverity::Overdue => summary.overdue += 1,
        }
        summary.total += 1;
    }
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub acknowledged_by: String,
}

async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<AcknowledgeRequest>,
) -> ScadaResult<Json<MaintenanceAlert>> {
    let alert = state
        .alerts
        .acknowledge(id, &request.acknowledged_by)
        .await?
        .ok_or_else(|| ScadaError::NotFound {
            resource: format!("active alert {id}"),
        })?;
    info!("Alert {} acknowledged by {}", id, request.acknowledged_by);
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub interval_id: Option<i64>,
    pub engine_hours: f64,
    pub performed_by: Option<String>,
}

async fn record_maintenance(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<i64>,
    Json(request): Json<MaintenanceRequest>,
) -> ScadaResult<impl IntoResponse> {
    if !request.engine_hours.is_finite() || request.engine_hours < 0.0 {
        return Err(ScadaError::InvalidInput(
            "engine_hours must be a non-negative number".to_string(),
        ));
    }

    let record: ServiceRecord = state
        .alerts
        .record_service(
            device_id,
            request.interval_id,
            request.engine_hours,
            request.performed_by.as_deref(),
        )
        .await?;
    info!(
        "Maintenance recorded for device {} at {:.0} engine hours",
        device_id, record.engine_hours
    );
    Ok((StatusCode::CREATED, Json(record)))
}
