use crate::error::{CinecamError, Result};
use crate::frame::{FrameData, Rotation};
use image::{imageops, DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Longest edge of a generated thumbnail in pixels
pub const MAX_EDGE: u32 = 320;

/// JPEG preview of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Thumbnail {
    /// Downscale `frame`, turn it upright and encode it as JPEG
    pub fn from_frame(frame: &FrameData, rotation: Rotation) -> Result<Self> {
        let layout = frame.format.rgb_layout().ok_or_else(|| {
            CinecamError::component(
                "thumbnail",
                &format!("pixel format {:?} has no RGB layout", frame.format),
            )
        })?;
        if !frame.validate_size() {
            return Err(CinecamError::component(
                "thumbnail",
                "frame buffer does not match its dimensions",
            ));
        }

        let rgb: Vec<u8> = frame
            .data
            .chunks_exact(layout.stride)
            .flat_map(|px| [px[layout.r], px[layout.g], px[layout.b]])
            .collect();
        let full = RgbImage::from_raw(frame.width, frame.height, rgb).ok_or_else(|| {
            CinecamError::component("thumbnail", "failed to wrap frame pixels")
        })?;

        let (width, height) = fit_within(frame.width, frame.height, MAX_EDGE);
        let scaled = if (width, height) == (frame.width, frame.height) {
            full
        } else {
            imageops::thumbnail(&full, width, height)
        };

        let upright = match rotation {
            Rotation::Rotate0 => scaled,
            Rotation::Rotate90 => imageops::rotate90(&scaled),
            Rotation::Rotate180 => imageops::rotate180(&scaled),
            Rotation::Rotate270 => imageops::rotate270(&scaled),
        };
        let (width, height) = upright.dimensions();

        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(upright)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .map_err(|e| {
                CinecamError::component("thumbnail", &format!("Failed to encode JPEG: {}", e))
            })?;

        debug!(
            "Thumbnail {}x{} ({} bytes) from frame {}",
            width,
            height,
            jpeg.len(),
            frame.id
        );
        Ok(Self {
            jpeg,
            width,
            height,
        })
    }
}

/// Scale (width, height) so the longer edge is at most `max_edge`
fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge {
        return (width, height);
    }
    let scale = max_edge as f64 / longest as f64;
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::time::Duration;

    fn frame(width: u32, height: u32, format: PixelFormat) -> FrameData {
        FrameData::new(
            0,
            Duration::ZERO,
            Duration::from_millis(33),
            vec![200u8; format.frame_size(width, height)],
            width,
            height,
            format,
        )
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(3840, 2160, 320), (320, 180));
        assert_eq!(fit_within(1080, 1920, 320), (180, 320));
        assert_eq!(fit_within(200, 100, 320), (200, 100));
    }

    #[test]
    fn test_thumbnail_is_jpeg_and_bounded() {
        let thumbnail = Thumbnail::from_frame(&frame(640, 360, PixelFormat::Bgra32), Rotation::Rotate0)
            .unwrap();
        assert_eq!((thumbnail.width, thumbnail.height), (320, 180));
        assert_eq!(&thumbnail.jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory_with_format(&thumbnail.jpeg, ImageFormat::Jpeg)
            .unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 180));
    }

    #[test]
    fn test_thumbnail_is_upright() {
        let thumbnail = Thumbnail::from_frame(&frame(640, 360, PixelFormat::Rgb24), Rotation::Rotate90)
            .unwrap();
        assert_eq!((thumbnail.width, thumbnail.height), (180, 320));
    }

    #[test]
    fn test_planar_frames_are_rejected() {
        assert!(Thumbnail::from_frame(&frame(64, 64, PixelFormat::Nv12), Rotation::Rotate0).is_err());
    }
}
