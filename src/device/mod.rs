//! Capture hardware model.
//!
//! A [`DeviceBackend`] enumerates [`CaptureDevice`]s and opens exclusive
//! [`DeviceHandle`]s on them. Only the capture session controller holds a
//! handle; every other component asks the controller for changes.

mod simulated;
#[cfg(test)]
mod tests;

pub use simulated::{SimulatedBackend, SimulatedState};

use crate::error::CameraError;
use crate::frame::{AudioFrame, FrameData, PixelFormat, Rotation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which side of the body the camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePosition {
    Front,
    Back,
}

/// Color encodings a format can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    /// Rec.709 / sRGB
    Standard,
    /// Display P3
    WideGamut,
    /// Wide-dynamic-range log encoding intended for grading
    Log,
}

/// Frame rates offered to collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameRate {
    #[serde(rename = "23.976")]
    Fps23_976,
    #[serde(rename = "24")]
    Fps24,
    #[serde(rename = "25")]
    Fps25,
    #[serde(rename = "29.97")]
    Fps29_97,
    #[serde(rename = "30")]
    Fps30,
    #[serde(rename = "50")]
    Fps50,
    #[serde(rename = "60")]
    Fps60,
}

impl FrameRate {
    pub const ALL: [FrameRate; 7] = [
        FrameRate::Fps23_976,
        FrameRate::Fps24,
        FrameRate::Fps25,
        FrameRate::Fps29_97,
        FrameRate::Fps30,
        FrameRate::Fps50,
        FrameRate::Fps60,
    ];

    /// Frame duration as a rational number of seconds (numerator, denominator)
    pub fn frame_duration_rational(&self) -> (u64, u64) {
        match self {
            FrameRate::Fps23_976 => (1001, 24_000),
            FrameRate::Fps24 => (1, 24),
            FrameRate::Fps25 => (1, 25),
            FrameRate::Fps29_97 => (1001, 30_000),
            FrameRate::Fps30 => (1, 30),
            FrameRate::Fps50 => (1, 50),
            FrameRate::Fps60 => (1, 60),
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.pts_of(1)
    }

    /// Exact presentation time of the n-th frame, free of accumulated rounding
    pub fn pts_of(&self, frame_index: u64) -> Duration {
        let (num, den) = self.frame_duration_rational();
        let nanos = frame_index as u128 * num as u128 * 1_000_000_000u128 / den as u128;
        Duration::from_nanos(nanos as u64)
    }

    pub fn as_f64(&self) -> f64 {
        let (num, den) = self.frame_duration_rational();
        den as f64 / num as f64
    }

    /// Nearest enumerated rate, if one is within 0.01 fps
    pub fn from_fps(fps: f64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|rate| (rate.as_f64() - fps).abs() < 0.01)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameRate::Fps23_976 => write!(f, "23.976"),
            FrameRate::Fps29_97 => write!(f, "29.97"),
            other => write!(f, "{}", other.as_f64().round() as u32),
        }
    }
}

/// Inclusive frame-rate interval supported by a format
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRateRange {
    pub min: f64,
    pub max: f64,
}

impl FrameRateRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Containment with a small tolerance for fractional rates such as 23.976
    pub fn contains(&self, fps: f64) -> bool {
        const EPSILON: f64 = 0.01;
        fps >= self.min - EPSILON && fps <= self.max + EPSILON
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// One capture configuration a device can be switched into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub width: u32,
    pub height: u32,
    /// Sensor codec subtype, e.g. "420v" or "x420"
    pub codec_subtype: String,
    /// Pixel layout of delivered buffers
    pub pixel_format: PixelFormat,
    pub color_spaces: Vec<ColorSpace>,
    pub hdr: bool,
    pub frame_rate_ranges: Vec<FrameRateRange>,
    /// Supported ISO (min, max)
    pub iso_range: (f32, f32),
}

impl FormatDescriptor {
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn supports_color_space(&self, space: ColorSpace) -> bool {
        self.color_spaces.contains(&space)
    }

    pub fn supports_fps(&self, fps: f64) -> bool {
        self.frame_rate_ranges.iter().any(|range| range.contains(fps))
    }

    pub fn max_fps(&self) -> f64 {
        self.frame_rate_ranges
            .iter()
            .map(|range| range.max)
            .fold(0.0, f64::max)
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} up to {:.0}fps{}{}",
            self.width,
            self.height,
            self.codec_subtype,
            self.max_fps(),
            if self.supports_color_space(ColorSpace::Log) {
                " log"
            } else {
                ""
            },
            if self.hdr { " hdr" } else { "" }
        )
    }
}

/// A physical camera as enumerated by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureDevice {
    pub id: String,
    pub name: String,
    pub position: DevicePosition,
    /// Optical magnification relative to the main wide lens
    pub nominal_zoom: f64,
    pub formats: Vec<FormatDescriptor>,
    /// Digital zoom factor bounds (min, max)
    pub zoom_range: (f64, f64),
    pub has_torch: bool,
}

impl CaptureDevice {
    pub fn clamp_zoom(&self, factor: f64) -> f64 {
        factor.clamp(self.zoom_range.0, self.zoom_range.1)
    }
}

/// Which sink a connection feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    Preview,
    VideoData,
    AudioData,
}

/// Association between the active input and one output sink
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub output: OutputKind,
    rotation: Rotation,
    pub mirrored: bool,
    supported_rotations: Vec<Rotation>,
}

impl Connection {
    pub fn new(output: OutputKind, supported_rotations: Vec<Rotation>, mirrored: bool) -> Self {
        Self {
            output,
            rotation: Rotation::Rotate0,
            mirrored,
            supported_rotations,
        }
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn supports_rotation(&self, rotation: Rotation) -> bool {
        self.supported_rotations.contains(&rotation)
    }

    /// Assign a rotation if this connection supports it.
    /// Returns whether the assignment happened.
    pub fn set_rotation(&mut self, rotation: Rotation) -> bool {
        if !self.supports_rotation(rotation) {
            return false;
        }
        self.rotation = rotation;
        true
    }
}

/// Messages emitted on the video delivery queue
#[derive(Debug, Clone)]
pub enum SensorEvent {
    Frame(FrameData),
    /// The capture pipeline was torn down by an external party
    Interrupted { reason: String },
}

/// Queues a streaming device delivers into
#[derive(Debug, Clone)]
pub struct SampleOutputs {
    pub video: crossbeam::channel::Sender<SensorEvent>,
    pub audio: Option<crossbeam::channel::Sender<AudioFrame>>,
}

/// Enumerates and opens capture hardware
pub trait DeviceBackend: Send + Sync {
    fn devices(&self) -> Vec<CaptureDevice>;

    fn open(&self, device_id: &str) -> Result<Box<dyn DeviceHandle>, CameraError>;

    /// Default device for a position: the 1x lens when present
    fn default_device(&self, position: DevicePosition) -> Option<CaptureDevice> {
        let devices: Vec<CaptureDevice> = self
            .devices()
            .into_iter()
            .filter(|device| device.position == position)
            .collect();
        devices
            .iter()
            .find(|device| (device.nominal_zoom - 1.0).abs() < f64::EPSILON)
            .or_else(|| devices.first())
            .cloned()
    }
}

/// Exclusive control over one opened device.
///
/// Mutating calls other than streaming require the configuration lock;
/// use [`DeviceLock`] so the lock is always released.
pub trait DeviceHandle: Send {
    fn device(&self) -> &CaptureDevice;

    fn lock_for_configuration(&mut self) -> Result<(), CameraError>;

    fn unlock_for_configuration(&mut self);

    fn set_active_format(&mut self, format: &FormatDescriptor) -> Result<(), CameraError>;

    fn set_frame_duration(&mut self, rate: FrameRate) -> Result<(), CameraError>;

    fn set_color_space(&mut self, space: ColorSpace) -> Result<(), CameraError>;

    fn zoom_factor(&self) -> f64;

    fn set_zoom_factor(&mut self, factor: f64) -> Result<(), CameraError>;

    /// Move towards `factor` smoothly at `rate` (powers of two per second)
    fn ramp_zoom(&mut self, factor: f64, rate: f64) -> Result<(), CameraError>;

    fn set_white_balance(&mut self, kelvin: f32) -> Result<(), CameraError>;

    fn set_torch(&mut self, level: f32) -> Result<(), CameraError>;

    fn start_streaming(&mut self, outputs: SampleOutputs) -> Result<(), CameraError>;

    fn stop_streaming(&mut self);
}

/// Holds a device's configuration lock and releases it on drop
pub struct DeviceLock<'a> {
    handle: &'a mut (dyn DeviceHandle + 'static),
}

impl<'a> DeviceLock<'a> {
    pub fn acquire(handle: &'a mut (dyn DeviceHandle + 'static)) -> Result<Self, CameraError> {
        handle.lock_for_configuration()?;
        Ok(Self { handle })
    }
}

impl std::ops::Deref for DeviceLock<'_> {
    type Target = dyn DeviceHandle + 'static;

    fn deref(&self) -> &Self::Target {
        &*self.handle
    }
}

impl std::ops::DerefMut for DeviceLock<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.handle
    }
}

impl Drop for DeviceLock<'_> {
    fn drop(&mut self) {
        self.handle.unlock_for_configuration();
    }
}
