//! HTTP request handlers.

use super::AppState;
use crate::config::{options, validate_option};
use crate::db::{DbError, Device, PingMethod};
use crate::status::AvailabilityMode;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

const DEFAULT_EVENT_LIMIT: u32 = 50;
const MAX_EVENT_LIMIT: u32 = 1000;
/// Upper bound for probe timeouts, in milliseconds.
const MAX_TIMEOUT_MS: u64 = 60_000;

fn db_error_response(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "Device not found").into_response(),
        e => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub devices: usize,
    pub polling: usize,
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_devices() {
        Ok(devices) => Json(HealthResponse {
            status: "ok",
            devices: devices.len(),
            polling: state.scheduler.active_devices().await,
        })
        .into_response(),
        Err(e) => db_error_response(e),
    }
}

// ============================================================================
// API: Devices
// ============================================================================

pub async fn handle_get_devices(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_devices() {
        Ok(devices) => Json(devices).into_response(),
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_get_device(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_device(id) {
        Ok(device) => Json(device).into_response(),
        Err(e) => db_error_response(e),
    }
}

/// Device settings accepted on create and update. Missing fields keep the
/// current value (or the default, on create).
#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    pub hostname: Option<String>,
    pub description: Option<String>,
    pub disabled: Option<bool>,
    pub availability_method: Option<AvailabilityMode>,
    pub ping_method: Option<PingMethod>,
    pub ping_port: Option<u16>,
    pub ping_timeout_ms: Option<u64>,
    pub ping_retries: Option<u32>,
    pub snmp_community: Option<String>,
    pub snmp_version: Option<u8>,
    pub snmp_port: Option<u16>,
    pub snmp_timeout_ms: Option<u64>,
}

impl DeviceRequest {
    /// Overlay the request onto `device` and check the result.
    fn apply(self, device: &mut Device) -> Result<(), String> {
        if let Some(v) = self.hostname {
            device.hostname = v.trim().to_string();
        }
        if let Some(v) = self.description {
            device.description = v;
        }
        if let Some(v) = self.disabled {
            device.disabled = v;
        }
        if let Some(v) = self.availability_method {
            device.availability_method = v;
        }
        if let Some(v) = self.ping_method {
            device.ping_method = v;
        }
        if let Some(v) = self.ping_port {
            device.ping_port = v;
        }
        if let Some(v) = self.ping_timeout_ms {
            device.ping_timeout_ms = v;
        }
        if let Some(v) = self.ping_retries {
            device.ping_retries = v;
        }
        if let Some(v) = self.snmp_community {
            device.health.snmp_community = v;
        }
        if let Some(v) = self.snmp_version {
            device.health.snmp_version = v;
        }
        if let Some(v) = self.snmp_port {
            device.snmp_port = v;
        }
        if let Some(v) = self.snmp_timeout_ms {
            device.snmp_timeout_ms = v;
        }
        validate_device(device)
    }
}

fn validate_device(device: &Device) -> Result<(), String> {
    if device.hostname.is_empty() {
        return Err("hostname is required".to_string());
    }
    if !(1..=3).contains(&device.health.snmp_version) {
        return Err(format!("invalid SNMP version: {}", device.health.snmp_version));
    }
    if device.ping_method == PingMethod::Tcp && device.ping_port == 0 {
        return Err("TCP ping needs a port".to_string());
    }
    for (name, value) in [
        ("ping_timeout_ms", device.ping_timeout_ms),
        ("snmp_timeout_ms", device.snmp_timeout_ms),
    ] {
        if value == 0 || value > MAX_TIMEOUT_MS {
            return Err(format!("{} must be between 1 and {}", name, MAX_TIMEOUT_MS));
        }
    }
    if device.ping_retries == 0 {
        return Err("ping_retries must be at least 1".to_string());
    }
    Ok(())
}

pub async fn handle_create_device(
    State(state): State<AppState>,
    Json(req): Json<DeviceRequest>,
) -> impl IntoResponse {
    let mut device = Device::default();
    if let Err(e) = req.apply(&mut device) {
        return (StatusCode::BAD_REQUEST, e).into_response();
    }

    match state.store.add_device(&mut device) {
        Ok(_) => {
            state.scheduler.add_device(device.clone()).await;
            (StatusCode::CREATED, Json(device)).into_response()
        }
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_update_device(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<DeviceRequest>,
) -> impl IntoResponse {
    let mut device = match state.store.get_device(id) {
        Ok(d) => d,
        Err(e) => return db_error_response(e),
    };
    if let Err(e) = req.apply(&mut device) {
        return (StatusCode::BAD_REQUEST, e).into_response();
    }

    // Stop the old poll loop first so it does not overwrite the new settings.
    state.scheduler.remove_device(id).await;

    if let Err(e) = state.store.update_device(&device) {
        return db_error_response(e);
    }
    let updated = match state.store.get_device(id) {
        Ok(d) => d,
        Err(e) => return db_error_response(e),
    };
    state.scheduler.add_device(updated.clone()).await;
    Json(updated).into_response()
}

pub async fn handle_delete_device(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if let Err(e) = state.store.get_device(id) {
        return db_error_response(e);
    }
    state.scheduler.remove_device(id).await;

    match state.store.delete_device(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error_response(e),
    }
}

// ============================================================================
// API: Events
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn handle_get_events(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    if let Err(e) = state.store.get_device(id) {
        return db_error_response(e);
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);

    match state.store.get_device_events(id, limit) {
        Ok(events) => Json(events).into_response(),
        Err(e) => db_error_response(e),
    }
}

// ============================================================================
// API: Settings
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub name: String,
    /// `None` when the option falls back to its default.
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettingRequest {
    pub value: String,
}

pub async fn handle_get_setting(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if !options::ALL.contains(&name.as_str()) {
        return (StatusCode::NOT_FOUND, "Unknown setting").into_response();
    }
    match state.store.get_setting(&name) {
        Ok(value) => Json(SettingResponse { name, value }).into_response(),
        Err(e) => db_error_response(e),
    }
}

/// Store a poller option. Values are read at startup, so a change takes
/// effect on the next restart.
pub async fn handle_put_setting(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SettingRequest>,
) -> impl IntoResponse {
    if !options::ALL.contains(&name.as_str()) {
        return (StatusCode::NOT_FOUND, "Unknown setting").into_response();
    }
    if let Err(e) = validate_option(&name, &req.value) {
        return (StatusCode::BAD_REQUEST, e).into_response();
    }

    let value = req.value.trim().to_string();
    match state.store.set_setting(&name, &value) {
        Ok(()) => {
            tracing::info!("Setting {} changed to {:?}", name, value);
            Json(SettingResponse {
                name,
                value: Some(value),
            })
            .into_response()
        }
        Err(e) => db_error_response(e),
    }
}
