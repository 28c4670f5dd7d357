use super::collaborators::ImageRescaler;
use crate::error::CaptureError;
use async_trait::async_trait;
use bytes::Bytes;
use image::imageops::FilterType;
use image::ImageOutputFormat;
use std::io::Cursor;

/// In-process zoom: crop the centre by the factor and scale back up
pub struct CenterCropRescaler {
    quality: u8,
}

impl CenterCropRescaler {
    pub fn new() -> Self {
        Self { quality: 90 }
    }

    /// Synchronous worker, also used directly by tests
    pub fn rescale_blocking(&self, image: &[u8], factor: f64) -> Result<Vec<u8>, CaptureError> {
        let rescale_error = |e: image::ImageError| CaptureError::Rescale {
            details: e.to_string(),
        };

        let decoded = image::load_from_memory(image).map_err(rescale_error)?;
        let (width, height) = (decoded.width(), decoded.height());

        let crop_width = ((width as f64 / factor) as u32).clamp(1, width);
        let crop_height = ((height as f64 / factor) as u32).clamp(1, height);
        let x = (width - crop_width) / 2;
        let y = (height - crop_height) / 2;

        let zoomed = decoded
            .crop_imm(x, y, crop_width, crop_height)
            .resize_exact(width, height, FilterType::Triangle);

        let mut encoded = Cursor::new(Vec::new());
        zoomed
            .write_to(&mut encoded, ImageOutputFormat::Jpeg(self.quality))
            .map_err(rescale_error)?;
        Ok(encoded.into_inner())
    }
}

impl Default for CenterCropRescaler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageRescaler for CenterCropRescaler {
    async fn rescale(&self, image: Bytes, factor: f64) -> Result<Bytes, CaptureError> {
        let worker = Self {
            quality: self.quality,
        };
        tokio::task::spawn_blocking(move || worker.rescale_blocking(&image, factor))
            .await
            .map_err(|e| CaptureError::Rescale {
                details: format!("rescale task failed: {}", e),
            })?
            .map(Bytes::from)
    }
}
