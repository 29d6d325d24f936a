use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Pixel layouts produced by the sensor or by the LUT renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit RGB
    Rgb24,
    /// Packed 8-bit RGBA
    Rgba32,
    /// Packed 8-bit BGRA (the usual sensor delivery format)
    Bgra32,
    /// YUV 4:2:2 interleaved
    Yuyv,
    /// YUV 4:2:0 bi-planar
    Nv12,
}

impl PixelFormat {
    /// Expected buffer size in bytes for a frame of the given dimensions
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb24 => pixels * 3,
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => pixels * 4,
            PixelFormat::Yuyv => pixels * 2,
            PixelFormat::Nv12 => pixels + pixels / 2,
        }
    }

    /// Byte offsets of the red, green and blue channels plus the pixel stride,
    /// for packed RGB layouts only.
    pub fn rgb_layout(&self) -> Option<RgbLayout> {
        match self {
            PixelFormat::Rgb24 => Some(RgbLayout {
                r: 0,
                g: 1,
                b: 2,
                stride: 3,
            }),
            PixelFormat::Rgba32 => Some(RgbLayout {
                r: 0,
                g: 1,
                b: 2,
                stride: 4,
            }),
            PixelFormat::Bgra32 => Some(RgbLayout {
                r: 2,
                g: 1,
                b: 0,
                stride: 4,
            }),
            PixelFormat::Yuyv | PixelFormat::Nv12 => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbLayout {
    pub r: usize,
    pub g: usize,
    pub b: usize,
    pub stride: usize,
}

/// A captured video frame.
///
/// Pixel data is shared through an `Arc`, so handing a frame to the preview
/// and the recorder is a reference-count bump. The buffer is released when the
/// last holder drops it, whichever stage that is.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Sequence number assigned by the source
    pub id: u64,
    /// Wall-clock time the frame was delivered
    pub captured_at: SystemTime,
    /// Presentation timestamp on the source clock
    pub pts: Duration,
    /// Nominal frame duration
    pub duration: Duration,
    /// Pixel data
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameData {
    pub fn new(
        id: u64,
        pts: Duration,
        duration: Duration,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Self {
        Self {
            id,
            captured_at: SystemTime::now(),
            pts,
            duration,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Check the buffer length against the pixel format
    pub fn validate_size(&self) -> bool {
        self.data.len() == self.format.frame_size(self.width, self.height)
    }

    /// Wrap new pixel data with this frame's identity, geometry and timing
    pub fn with_data(&self, data: Vec<u8>) -> Self {
        Self {
            id: self.id,
            captured_at: self.captured_at,
            pts: self.pts,
            duration: self.duration,
            data: Arc::new(data),
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }

    /// Presentation end time
    pub fn end(&self) -> Duration {
        self.pts + self.duration
    }
}

/// A buffer of interleaved signed 16-bit PCM samples
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: Duration,
    pub duration: Duration,
    pub samples: Arc<Vec<i16>>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    pub fn new(pts: Duration, samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        let frames = samples.len() / channels.max(1) as usize;
        let duration = Duration::from_secs_f64(frames as f64 / sample_rate.max(1) as f64);
        Self {
            pts,
            duration,
            samples: Arc::new(samples),
            sample_rate,
            channels,
        }
    }

    /// Number of sample frames (one sample per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Discrete clockwise rotation applied to a frame stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Rotate0,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Rotate0,
        Rotation::Rotate90,
        Rotation::Rotate180,
        Rotation::Rotate270,
    ];

    /// Get rotation angle in degrees
    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::Rotate0 => 0,
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }

    /// Parse an angle in degrees; only the four right angles are valid
    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Rotate0),
            90 => Some(Rotation::Rotate90),
            180 => Some(Rotation::Rotate180),
            270 => Some(Rotation::Rotate270),
            _ => None,
        }
    }

    /// Rotation by half a turn
    pub fn opposite(&self) -> Self {
        match self {
            Rotation::Rotate0 => Rotation::Rotate180,
            Rotation::Rotate90 => Rotation::Rotate270,
            Rotation::Rotate180 => Rotation::Rotate0,
            Rotation::Rotate270 => Rotation::Rotate90,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_sizes() {
        assert_eq!(PixelFormat::Rgb24.frame_size(640, 480), 640 * 480 * 3);
        assert_eq!(PixelFormat::Bgra32.frame_size(640, 480), 640 * 480 * 4);
        assert_eq!(PixelFormat::Yuyv.frame_size(640, 480), 640 * 480 * 2);
        assert_eq!(PixelFormat::Nv12.frame_size(640, 480), 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_rgb_layouts() {
        let bgra = PixelFormat::Bgra32.rgb_layout().unwrap();
        assert_eq!((bgra.r, bgra.g, bgra.b, bgra.stride), (2, 1, 0, 4));
        assert!(PixelFormat::Nv12.rgb_layout().is_none());
    }

    #[test]
    fn test_rotation_degrees() {
        for rotation in Rotation::ALL {
            assert_eq!(Rotation::from_degrees(rotation.degrees()), Some(rotation));
        }
        assert_eq!(Rotation::from_degrees(45), None);
        assert_eq!(Rotation::Rotate90.opposite(), Rotation::Rotate270);
    }

    #[test]
    fn test_with_data_preserves_timing() {
        let frame = FrameData::new(
            7,
            Duration::from_millis(233),
            Duration::from_micros(33_367),
            vec![0u8; 4 * 4 * 3],
            4,
            4,
            PixelFormat::Rgb24,
        );
        let rewrapped = frame.with_data(vec![1u8; 4 * 4 * 3]);

        assert_eq!(rewrapped.id, 7);
        assert_eq!(rewrapped.pts, frame.pts);
        assert_eq!(rewrapped.duration, frame.duration);
        assert!(rewrapped.validate_size());
        assert!(!Arc::ptr_eq(&rewrapped.data, &frame.data));
    }

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame::new(Duration::ZERO, vec![0i16; 1024 * 2], 48_000, 2);
        assert_eq!(frame.frame_count(), 1024);
        let expected = 1024.0 / 48_000.0;
        assert!((frame.duration.as_secs_f64() - expected).abs() < 1e-9);
    }
}
