use crate::device::{CameraSource, ComponentStatus, Device, StatusAxis};
use crate::error::{CaptureError, StoreError};
use crate::health::{DeviceCheck, FleetSummary};
use crate::telemetry::ControlAction;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::error::ApiError;
use super::server::ApiState;

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: ComponentStatus,
}

#[derive(Debug, Deserialize)]
pub struct FrameQuery {
    /// Overrides the configured frame wait
    pub timeout_ms: Option<u64>,
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let uptime = Utc::now() - state.started_at;

    let health_info = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime.num_seconds(),
        "frame_sessions": state.frames.active_sessions(),
        "pending_movements": state.movement.waiters().total_pending(),
    });

    (StatusCode::OK, Json(health_info))
}

pub async fn fleet_summary_handler(
    State(state): State<ApiState>,
) -> Result<Json<FleetSummary>, ApiError> {
    Ok(Json(state.health.summarize().await?))
}

/// Probe one device now, whatever its monitor mode
pub async fn check_device_handler(
    State(state): State<ApiState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceCheck>, ApiError> {
    info!("Manual health check requested for device {}", device_id);
    Ok(Json(state.health.check_one(&device_id).await?))
}

pub async fn set_status_handler(
    State(state): State<ApiState>,
    Path((device_id, axis)): Path<(String, String)>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Device>, ApiError> {
    let axis = StatusAxis::parse(&axis)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown status component '{}'", axis)))?;

    let device = state
        .health
        .set_status(&device_id, axis, update.status)
        .await?;
    Ok(Json(device))
}

/// Current JPEG for a device, from its live session or its local image
pub async fn frame_handler(
    State(state): State<ApiState>,
    Path(device_id): Path<String>,
    Query(query): Query<FrameQuery>,
) -> Result<Response, ApiError> {
    let device = load_device(&state, &device_id).await?;

    let frame = if device.uses_local_image() {
        read_local_image(&device).await?
    } else {
        let source_url = device.stream_url().ok_or_else(|| CaptureError::NoStreamUrl {
            device_id: device_id.clone(),
        })?;
        let timeout = query
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| state.frames.default_timeout());

        state
            .frames
            .get_frame(&device_id, &source_url, timeout)
            .await?
    };

    debug!("Serving {} byte frame for device {}", frame.len(), device_id);

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache, private"),
        ],
        frame,
    )
        .into_response())
}

pub async fn control_handler(
    State(state): State<ApiState>,
    Path((device_id, action)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let action = ControlAction::parse(&action).ok_or_else(|| {
        let available: Vec<&str> = ControlAction::ALL.iter().map(|a| a.as_str()).collect();
        ApiError::BadRequest(format!(
            "unknown action '{}', available: {}",
            action,
            available.join(", ")
        ))
    })?;

    let device = load_device(&state, &device_id).await?;
    state
        .movement
        .send_command(&device, &action.command())
        .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "device_id": device_id,
        "action": action.as_str(),
    })))
}

/// Move to a stored route coordinate, photograph it and persist the image
pub async fn capture_handler(
    State(state): State<ApiState>,
    Path((device_id, index)): Path<(String, usize)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let captured = state.capture.capture_and_persist(&device_id, index).await?;

    Ok(Json(serde_json::json!({
        "device_id": device_id,
        "index": index,
        "timestamp": captured.timestamp,
        "zoom_applied": captured.zoom_applied,
        "bytes": captured.image.len(),
    })))
}

pub async fn start_monitor_handler(
    State(state): State<ApiState>,
    Path(device_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let device = state.patrol.start_monitoring(&device_id).await?;
    Ok(monitor_response(&device, "Monitoring started"))
}

pub async fn pause_monitor_handler(
    State(state): State<ApiState>,
    Path(device_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let device = state.patrol.pause_monitoring(&device_id).await?;
    Ok(monitor_response(&device, "Monitoring paused"))
}

fn monitor_response(device: &Device, message: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "message": message,
        "device": {
            "id": device.id,
            "name": device.name,
            "monitor_mode": device.monitor_mode,
        },
    }))
}

async fn load_device(state: &ApiState, device_id: &str) -> Result<Device, ApiError> {
    state
        .store
        .device(device_id)
        .await?
        .ok_or_else(|| {
            ApiError::Store(StoreError::DeviceNotFound {
                device_id: device_id.to_string(),
            })
        })
}

async fn read_local_image(device: &Device) -> Result<Bytes, ApiError> {
    let path = match device.camera.as_ref() {
        Some(CameraSource::Local { path }) => path.clone(),
        _ => {
            return Err(CaptureError::NoStreamUrl {
                device_id: device.id.clone(),
            }
            .into())
        }
    };

    tokio::fs::read(&path)
        .await
        .map(Bytes::from)
        .map_err(|e| {
            CaptureError::Grab {
                details: format!("failed to read {}: {}", path, e),
            }
            .into()
        })
}
