use crate::device::{FormatDescriptor, FrameRate};
use crate::frame::Rotation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Video codecs offered for recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    Hevc,
    #[serde(rename = "prores422")]
    ProRes422,
    #[serde(rename = "prores422hq")]
    ProRes422Hq,
}

impl VideoCodec {
    /// Intraframe codecs have no bitrate target
    pub fn is_intraframe(&self) -> bool {
        matches!(self, VideoCodec::ProRes422 | VideoCodec::ProRes422Hq)
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::Hevc => write!(f, "HEVC"),
            VideoCodec::ProRes422 => write!(f, "ProRes 422"),
            VideoCodec::ProRes422Hq => write!(f, "ProRes 422 HQ"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HevcProfile {
    Main,
    Main10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorPrimaries {
    Rec709,
    P3D65,
    Rec2020,
}

/// Encoder configuration for the video track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    /// Average bitrate in bits per second; `None` for intraframe codecs
    pub bitrate: Option<u64>,
    pub profile: Option<HevcProfile>,
    pub color_primaries: ColorPrimaries,
    /// Rotation written once as the track transform
    pub rotation: Rotation,
}

/// Bits per pixel per frame for HEVC, standard and log sources
const HEVC_BITS_PER_PIXEL: f64 = 0.1;
const HEVC_LOG_BITS_PER_PIXEL: f64 = 0.15;

impl VideoSettings {
    /// Derive encoder settings from the active format and grading state.
    ///
    /// Log footage without a LUT keeps its wide gamut and needs 10-bit; a LUT
    /// renders to display-referred Rec.709.
    pub fn derive(
        format: &FormatDescriptor,
        frame_rate: FrameRate,
        codec: VideoCodec,
        log_color: bool,
        lut_active: bool,
        rotation: Rotation,
    ) -> Self {
        let keeps_log = log_color && !lut_active;
        let color_primaries = if keeps_log {
            ColorPrimaries::Rec2020
        } else if format.hdr && !lut_active {
            ColorPrimaries::P3D65
        } else {
            ColorPrimaries::Rec709
        };

        let (bitrate, profile) = if codec.is_intraframe() {
            (None, None)
        } else {
            let bpp = if keeps_log {
                HEVC_LOG_BITS_PER_PIXEL
            } else {
                HEVC_BITS_PER_PIXEL
            };
            let pixels_per_second =
                format.width as f64 * format.height as f64 * frame_rate.as_f64();
            let profile = if keeps_log || format.hdr {
                HevcProfile::Main10
            } else {
                HevcProfile::Main
            };
            (Some((pixels_per_second * bpp) as u64), Some(profile))
        };

        Self {
            codec,
            width: format.width,
            height: format.height,
            frame_rate,
            bitrate,
            profile,
            color_primaries,
            rotation,
        }
    }
}

/// Fixed linear PCM audio track layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioSettings {
    pub const LPCM_48K_STEREO: AudioSettings = AudioSettings {
        sample_rate: 48_000,
        channels: 2,
        bits_per_sample: 16,
    };
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self::LPCM_48K_STEREO
    }
}
