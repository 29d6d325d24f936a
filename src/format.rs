//! Format selection over a device's capability list.
//!
//! Selection is a pure function of the enumerated formats and the request, so
//! it is exercised without any device attached.

use crate::device::{CaptureDevice, ColorSpace, FormatDescriptor, FrameRate};
use crate::error::CameraError;
use std::fmt;
use thiserror::Error;

/// What a caller wants from the sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatRequest {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub log_color: bool,
}

impl fmt::Display for FormatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ {}fps{}",
            self.width,
            self.height,
            self.frame_rate,
            if self.log_color { " log" } else { "" }
        )
    }
}

/// The first constraint no enumerated format could satisfy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatMismatch {
    #[error("device offers no formats")]
    NoFormats,

    #[error("no format at or above {width}x{height}")]
    Resolution { width: u32, height: u32 },

    #[error("no format at or above {width}x{height} supports {frame_rate} fps")]
    FrameRate {
        width: u32,
        height: u32,
        frame_rate: FrameRate,
    },

    #[error("no log-capable format at {width}x{height} @ {frame_rate} fps (color space unsupported)")]
    ColorSpace {
        width: u32,
        height: u32,
        frame_rate: FrameRate,
    },
}

impl From<FormatMismatch> for CameraError {
    fn from(mismatch: FormatMismatch) -> Self {
        CameraError::configuration(mismatch.to_string())
    }
}

/// Pick the best format for a request.
///
/// Candidates must cover the requested resolution, contain the frame rate and,
/// when asked, offer the log color space. Among candidates an exact resolution
/// wins, then the narrowest frame-rate range, then enumeration order.
pub fn select(
    formats: &[FormatDescriptor],
    request: &FormatRequest,
) -> Result<FormatDescriptor, FormatMismatch> {
    if formats.is_empty() {
        return Err(FormatMismatch::NoFormats);
    }

    let fps = request.frame_rate.as_f64();

    let large_enough: Vec<(usize, &FormatDescriptor)> = formats
        .iter()
        .enumerate()
        .filter(|(_, format)| format.width >= request.width && format.height >= request.height)
        .collect();
    if large_enough.is_empty() {
        return Err(FormatMismatch::Resolution {
            width: request.width,
            height: request.height,
        });
    }

    let rate_capable: Vec<(usize, &FormatDescriptor)> = large_enough
        .into_iter()
        .filter(|(_, format)| format.supports_fps(fps))
        .collect();
    if rate_capable.is_empty() {
        return Err(FormatMismatch::FrameRate {
            width: request.width,
            height: request.height,
            frame_rate: request.frame_rate,
        });
    }

    let candidates: Vec<(usize, &FormatDescriptor)> = rate_capable
        .into_iter()
        .filter(|(_, format)| !request.log_color || format.supports_color_space(ColorSpace::Log))
        .collect();
    if candidates.is_empty() {
        return Err(FormatMismatch::ColorSpace {
            width: request.width,
            height: request.height,
            frame_rate: request.frame_rate,
        });
    }

    candidates
        .into_iter()
        .min_by(|(index_a, a), (index_b, b)| {
            let exact_a = a.resolution() == (request.width, request.height);
            let exact_b = b.resolution() == (request.width, request.height);
            exact_b
                .cmp(&exact_a)
                .then_with(|| {
                    narrowest_range(a, fps)
                        .partial_cmp(&narrowest_range(b, fps))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| index_a.cmp(index_b))
        })
        .map(|(_, format)| format.clone())
        .ok_or(FormatMismatch::NoFormats)
}

/// Width of the tightest range containing `fps`
fn narrowest_range(format: &FormatDescriptor, fps: f64) -> f64 {
    format
        .frame_rate_ranges
        .iter()
        .filter(|range| range.contains(fps))
        .map(|range| range.width())
        .fold(f64::INFINITY, f64::min)
}

/// Capability queries over one device
pub struct FormatCatalog<'a> {
    device: &'a CaptureDevice,
}

impl<'a> FormatCatalog<'a> {
    pub fn new(device: &'a CaptureDevice) -> Self {
        Self { device }
    }

    pub fn select(&self, request: &FormatRequest) -> Result<FormatDescriptor, FormatMismatch> {
        select(&self.device.formats, request)
    }

    /// Distinct resolutions, largest first
    pub fn resolutions(&self) -> Vec<(u32, u32)> {
        let mut resolutions: Vec<(u32, u32)> = Vec::new();
        for format in &self.device.formats {
            if !resolutions.contains(&format.resolution()) {
                resolutions.push(format.resolution());
            }
        }
        resolutions.sort_by(|a, b| (b.0 * b.1).cmp(&(a.0 * a.1)));
        resolutions
    }

    /// Enumerated frame rates reachable at a resolution
    pub fn frame_rates(&self, width: u32, height: u32) -> Vec<FrameRate> {
        FrameRate::ALL
            .into_iter()
            .filter(|rate| {
                self.device.formats.iter().any(|format| {
                    format.resolution() == (width, height) && format.supports_fps(rate.as_f64())
                })
            })
            .collect()
    }

    pub fn supports_log(&self, width: u32, height: u32, frame_rate: FrameRate) -> bool {
        self.select(&FormatRequest {
            width,
            height,
            frame_rate,
            log_color: true,
        })
        .is_ok()
    }

    pub fn supports_hdr(&self) -> bool {
        self.device.formats.iter().any(|format| format.hdr)
    }
}
