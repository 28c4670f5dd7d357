use super::collaborators::{FrameGrabber, ImageRescaler};
use crate::config::CvServiceConfig;
use crate::device::{CameraSource, Device};
use crate::error::CaptureError;
use crate::patrol::{BirdDetector, DetectionReport};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct CaptureFrameRequest<'a> {
    rtsp_url: &'a str,
    timeout: u64,
}

#[derive(Debug, Serialize)]
struct ApplyZoomRequest {
    image: String,
    zoom: f64,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    image: Option<String>,
}

/// HTTP client for the computer-vision service
pub struct CvServiceClient {
    client: reqwest::Client,
    base_url: String,
    capture_timeout: Duration,
    zoom_timeout: Duration,
    detect_timeout: Duration,
}

impl CvServiceClient {
    pub fn new(config: &CvServiceConfig) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CaptureError::Grab {
                details: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            capture_timeout: Duration::from_secs(config.capture_timeout_seconds),
            zoom_timeout: Duration::from_secs(config.zoom_timeout_seconds),
            detect_timeout: Duration::from_secs(config.detect_timeout_seconds),
        })
    }

    async fn post_for_image<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<Bytes, String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request to {} failed: {}", url, e))?;

        if !response.status().is_success() {
            return Err(format!("{} returned {}", url, response.status()));
        }

        let payload: ImageResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid response from {}: {}", url, e))?;

        let encoded = payload
            .image
            .ok_or_else(|| format!("{} returned no image", url))?;

        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(|e| format!("{} returned undecodable image: {}", url, e))
    }
}

#[async_trait]
impl FrameGrabber for CvServiceClient {
    async fn capture_frame_once(&self, device: &Device) -> Result<Bytes, CaptureError> {
        let camera = device.camera.as_ref().ok_or_else(|| CaptureError::NoCamera {
            device_id: device.id.clone(),
        })?;

        if let CameraSource::Local { path } = camera {
            debug!("Reading local image {} for device {}", path, device.id);
            let image = tokio::fs::read(path).await.map_err(|e| CaptureError::Grab {
                details: format!("failed to read {}: {}", path, e),
            })?;
            return Ok(Bytes::from(image));
        }

        let rtsp_url = camera.stream_url().ok_or_else(|| CaptureError::NoStreamUrl {
            device_id: device.id.clone(),
        })?;

        info!("Capturing frame for device {}", device.id);
        let request = CaptureFrameRequest {
            rtsp_url: &rtsp_url,
            timeout: self.capture_timeout.as_secs(),
        };

        // Leave the service its own open timeout before giving up on it
        let limit = self.capture_timeout + Duration::from_secs(5);
        self.post_for_image("/capture_frame", &request, limit)
            .await
            .map_err(|details| CaptureError::Grab { details })
    }
}

#[async_trait]
impl ImageRescaler for CvServiceClient {
    async fn rescale(&self, image: Bytes, factor: f64) -> Result<Bytes, CaptureError> {
        let request = ApplyZoomRequest {
            image: STANDARD.encode(&image),
            zoom: factor,
        };

        self.post_for_image("/apply_zoom", &request, self.zoom_timeout)
            .await
            .map_err(|details| CaptureError::Rescale { details })
    }
}

#[async_trait]
impl BirdDetector for CvServiceClient {
    async fn detect(&self, image: Bytes) -> Result<DetectionReport, CaptureError> {
        let url = format!("{}/detect_birds_optimized", self.base_url);
        let detect_error = |details: String| CaptureError::Detect { details };

        let part = Part::bytes(image.to_vec())
            .file_name("camera.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| detect_error(format!("invalid upload part: {}", e)))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .timeout(self.detect_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| detect_error(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(detect_error(format!("{} returned {}", url, response.status())));
        }

        let report: DetectionReport = response
            .json()
            .await
            .map_err(|e| detect_error(format!("invalid response from {}: {}", url, e)))?;

        debug!(
            "Detector found {} object(s) in {:.2}s",
            report.detections.len(),
            report.processing_time
        );
        Ok(report)
    }
}
