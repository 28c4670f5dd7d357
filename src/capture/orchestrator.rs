use super::collaborators::{FrameGrabber, ImageRescaler};
use crate::device::{Device, RouteCoordinate};
use crate::error::{CaptureError, StoreError};
use crate::events::{EventBus, FleetEvent};
use crate::movement::MovementCoordinator;
use crate::store::DeviceStore;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Image captured at one route coordinate
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub image: Bytes,
    pub timestamp: DateTime<Utc>,
    pub zoom_applied: bool,
}

impl CapturedImage {
    /// `data:` URL as stored on the coordinate
    pub fn data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", STANDARD.encode(&self.image))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteCaptureReport {
    pub device_id: String,
    pub captured: Vec<usize>,
    pub failed: Vec<(usize, String)>,
}

/// Moves a device through its route and photographs each waypoint
pub struct RouteCaptureOrchestrator {
    movement: Arc<MovementCoordinator>,
    grabber: Arc<dyn FrameGrabber>,
    rescaler: Arc<dyn ImageRescaler>,
    store: Arc<dyn DeviceStore>,
    events: Option<EventBus>,
}

impl RouteCaptureOrchestrator {
    pub fn new(
        movement: Arc<MovementCoordinator>,
        grabber: Arc<dyn FrameGrabber>,
        rescaler: Arc<dyn ImageRescaler>,
        store: Arc<dyn DeviceStore>,
    ) -> Self {
        Self {
            movement,
            grabber,
            rescaler,
            store,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Move to the coordinate, wait for it to settle and grab one frame.
    ///
    /// Zoom above 1.0 is applied by the rescaler; a failed rescale keeps the
    /// unzoomed frame instead of failing the capture.
    pub async fn capture_at(
        &self,
        device: &Device,
        coordinate: &RouteCoordinate,
    ) -> Result<CapturedImage, CaptureError> {
        if device.camera.is_none() {
            return Err(CaptureError::NoCamera {
                device_id: device.id.clone(),
            });
        }

        let outcome = self
            .movement
            .move_and_settle(device, coordinate.rotation, coordinate.tilt)
            .await?;
        info!(
            "Device {} at rotation {} tilt {} ({})",
            device.id,
            coordinate.rotation,
            coordinate.tilt,
            outcome.as_str()
        );

        let frame = self.grabber.capture_frame_once(device).await?;
        let zoom = coordinate.effective_zoom();

        let (image, zoom_applied) = if zoom > 1.0 {
            match self.rescaler.rescale(frame.clone(), zoom).await {
                Ok(zoomed) => (zoomed, true),
                Err(e) => {
                    warn!(
                        "Zoom {}x failed for device {}, keeping original frame: {}",
                        zoom, device.id, e
                    );
                    (frame, false)
                }
            }
        } else {
            (frame, false)
        };

        Ok(CapturedImage {
            image,
            timestamp: Utc::now(),
            zoom_applied,
        })
    }

    /// Capture one stored coordinate and persist the image onto it
    pub async fn capture_and_persist(
        &self,
        device_id: &str,
        index: usize,
    ) -> Result<CapturedImage, CaptureError> {
        let device = self.load_device(device_id).await?;
        self.capture_index(&device, index).await
    }

    /// Capture every coordinate in route order.
    ///
    /// A failing coordinate is recorded and skipped; the rest still run.
    pub async fn capture_route(&self, device_id: &str) -> Result<RouteCaptureReport, CaptureError> {
        let device = self.load_device(device_id).await?;

        let mut indices: Vec<usize> = (0..device.route.len()).collect();
        indices.sort_by_key(|&index| device.route[index].order);

        info!(
            "Capturing {} route coordinates for device {}",
            indices.len(),
            device_id
        );

        let mut report = RouteCaptureReport {
            device_id: device_id.to_string(),
            ..RouteCaptureReport::default()
        };

        for index in indices {
            match self.capture_index(&device, index).await {
                Ok(_) => report.captured.push(index),
                Err(e) => {
                    error!(
                        "Capture of coordinate {} for device {} failed: {}",
                        index, device_id, e
                    );
                    report.failed.push((index, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    async fn load_device(&self, device_id: &str) -> Result<Device, CaptureError> {
        self.store
            .device(device_id)
            .await?
            .ok_or_else(|| {
                CaptureError::Store(StoreError::DeviceNotFound {
                    device_id: device_id.to_string(),
                })
            })
    }

    async fn capture_index(
        &self,
        device: &Device,
        index: usize,
    ) -> Result<CapturedImage, CaptureError> {
        let coordinate = device
            .route
            .get(index)
            .ok_or_else(|| StoreError::CoordinateOutOfRange {
                device_id: device.id.clone(),
                index,
            })?;

        let captured = self.capture_at(device, coordinate).await?;
        self.store
            .persist_route_image(&device.id, index, captured.data_url(), captured.timestamp)
            .await?;

        if let Some(events) = &self.events {
            let _ = events.publish(FleetEvent::RouteImageCaptured {
                device_id: device.id.clone(),
                index,
                timestamp: captured.timestamp,
            });
        }

        Ok(captured)
    }
}
