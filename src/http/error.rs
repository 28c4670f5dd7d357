use crate::error::{CaptureError, FrameError, MovementError, StoreError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Error returned by every control handler
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Movement(#[from] MovementError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) => store_status(e),
            ApiError::Movement(e) => movement_status(e),
            ApiError::Frame(e) => match e {
                FrameError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                FrameError::SessionClosed { .. } => StatusCode::SERVICE_UNAVAILABLE,
                FrameError::Spawn { .. } | FrameError::DecoderStopped { .. } => {
                    StatusCode::BAD_GATEWAY
                }
            },
            ApiError::Capture(e) => match e {
                CaptureError::NoCamera { .. } | CaptureError::NoStreamUrl { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                CaptureError::Grab { .. }
                | CaptureError::Rescale { .. }
                | CaptureError::Detect { .. } => StatusCode::BAD_GATEWAY,
                CaptureError::Movement(e) => movement_status(e),
                CaptureError::Store(e) => store_status(e),
            },
        }
    }
}

fn store_status(error: &StoreError) -> StatusCode {
    match error {
        StoreError::DeviceNotFound { .. } | StoreError::CoordinateOutOfRange { .. } => {
            StatusCode::NOT_FOUND
        }
        StoreError::Backend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn movement_status(error: &MovementError) -> StatusCode {
    match error {
        MovementError::MissingActuatorAddress { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        MovementError::Dispatch { .. } => StatusCode::BAD_GATEWAY,
        MovementError::OwnerLookup { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        let mut body = json!({
            "code": status.as_u16(),
            "message": message,
        });

        // Server-side failures get an id to correlate with the log line
        if status.is_server_error() {
            let error_id = Uuid::new_v4();
            error!(error_id = ?error_id, "Request failed with {}: {}", status, message);
            body["error_id"] = json!(error_id.to_string());
        }

        (status, Json(body)).into_response()
    }
}
