use super::detector::BoundingBox;

/// Frame size assumed when the analysed JPEG has no readable header
pub const FALLBACK_DIMENSIONS: (u32, u32) = (426, 240);

/// Camera field of view at zoom 1, in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldOfView {
    pub horizontal: f64,
    pub vertical: f64,
}

/// Rotation and tilt offsets that centre `bbox` in the frame.
///
/// The field of view narrows linearly with `zoom`. Tilt is inverted since
/// image rows grow downward.
pub fn angle_adjustment(
    bbox: &BoundingBox,
    (width, height): (u32, u32),
    zoom: f64,
    fov: FieldOfView,
) -> (f64, f64) {
    if width == 0 || height == 0 {
        return (0.0, 0.0);
    }

    let zoom = if zoom.is_finite() && zoom > 0.0 { zoom } else { 1.0 };
    let (width, height) = (f64::from(width), f64::from(height));
    let (center_x, center_y) = bbox.center();

    let offset_x = center_x - width / 2.0;
    let offset_y = center_y - height / 2.0;

    let rotation = offset_x * (fov.horizontal / zoom) / width;
    let tilt = -offset_y * (fov.vertical / zoom) / height;
    (rotation, tilt)
}

/// Width and height from the first start-of-frame segment of a JPEG
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        // Fill bytes
        while pos < data.len() && data[pos] == 0xFF {
            pos += 1;
        }
        let marker = *data.get(pos)?;
        pos += 1;

        match marker {
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD7 => continue,
            0xD9 | 0xDA => return None,
            _ => {}
        }

        let length = usize::from(u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]));
        if length < 2 {
            return None;
        }

        let is_frame_header = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame_header {
            let header = data.get(pos + 3..pos + 7)?;
            let height = u32::from(u16::from_be_bytes([header[0], header[1]]));
            let width = u32::from(u16::from_be_bytes([header[2], header[3]]));
            return (width > 0 && height > 0).then_some((width, height));
        }

        pos += length;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAPO: FieldOfView = FieldOfView {
        horizontal: 60.0,
        vertical: 34.0,
    };

    fn bbox(x: f64, y: f64, width: f64, height: f64) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width,
            height,
        }
    }

    /// SOI, APP0 stub, SOF0 declaring the given size, EOI
    fn jpeg_header(width: u16, height: u16) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x4A, 0x46];
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&[0x03, 0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    #[test]
    fn test_centered_target_needs_no_adjustment() {
        let (rotation, tilt) = angle_adjustment(&bbox(200.0, 100.0, 26.0, 40.0), (426, 240), 1.0, TAPO);
        assert!(rotation.abs() < 1e-9);
        assert!(tilt.abs() < 1e-9);
    }

    #[test]
    fn test_offsets_scale_with_field_of_view_and_zoom() {
        // Right edge, top edge of a 1280x720 frame
        let target = bbox(1270.0, 0.0, 20.0, 20.0);

        let (rotation, tilt) = angle_adjustment(&target, (1280, 720), 1.0, TAPO);
        assert!((rotation - 30.0).abs() < 1e-9);
        assert!((tilt - 350.0 * 34.0 / 720.0).abs() < 1e-9);
        assert!(tilt > 0.0);

        let (zoomed_rotation, zoomed_tilt) = angle_adjustment(&target, (1280, 720), 3.0, TAPO);
        assert!((zoomed_rotation - 10.0).abs() < 1e-9);
        assert!((zoomed_tilt - tilt / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(angle_adjustment(&bbox(0.0, 0.0, 1.0, 1.0), (0, 240), 1.0, TAPO), (0.0, 0.0));

        let with_bad_zoom = angle_adjustment(&bbox(0.0, 120.0, 0.0, 0.0), (426, 240), 0.0, TAPO);
        assert!((with_bad_zoom.0 + 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_jpeg_dimensions() {
        assert_eq!(jpeg_dimensions(&jpeg_header(1280, 720)), Some((1280, 720)));
        assert_eq!(jpeg_dimensions(b"\xFF\xD8original\xFF\xD9"), None);
        assert_eq!(jpeg_dimensions(b"not a jpeg"), None);
        assert_eq!(jpeg_dimensions(&jpeg_header(1280, 720)[..14]), None);
    }
}
