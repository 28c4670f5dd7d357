use crate::device::Device;
use crate::error::CaptureError;
use async_trait::async_trait;
use bytes::Bytes;

/// One-shot "give me a frame now" from a device's camera
#[async_trait]
pub trait FrameGrabber: Send + Sync {
    async fn capture_frame_once(&self, device: &Device) -> Result<Bytes, CaptureError>;
}

/// Zooms an encoded image by a factor greater than 1.0
#[async_trait]
pub trait ImageRescaler: Send + Sync {
    async fn rescale(&self, image: Bytes, factor: f64) -> Result<Bytes, CaptureError>;
}
