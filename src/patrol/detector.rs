use crate::error::CaptureError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Class label the detector uses for birds
pub const BIRD_CLASS: &str = "bird";

/// Pixel rectangle in the analysed image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One object found by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class", default)]
    pub class: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    pub fn is_bird(&self) -> bool {
        self.class == BIRD_CLASS
    }
}

/// Response of the bird detection endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionReport {
    #[serde(default)]
    pub birds_found: bool,
    #[serde(default)]
    pub bird_count: usize,
    #[serde(default)]
    pub confidence_level: f64,
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Seconds the service spent on the image
    #[serde(default)]
    pub processing_time: f64,
}

impl DetectionReport {
    /// The bird detected with the highest confidence
    pub fn target(&self) -> Option<&Detection> {
        self.detections
            .iter()
            .filter(|detection| detection.is_bird())
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// Finds birds in a single JPEG frame
#[async_trait]
pub trait BirdDetector: Send + Sync {
    async fn detect(&self, image: Bytes) -> Result<DetectionReport, CaptureError>;
}
