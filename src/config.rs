use crate::device::{DevicePosition, FrameRate};
use crate::orientation::SensorMount;
use crate::recording::VideoCodec;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CinecamConfig {
    pub camera: CameraConfig,
    #[serde(default)]
    pub lut: LutConfig,
    #[serde(default)]
    pub orientation: OrientationConfig,
    pub recording: RecordingConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Which side of the device to capture from
    #[serde(default = "default_camera_position")]
    pub position: DevicePosition,

    /// Target resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Target frame rate, one of 23.976, 24, 25, 29.97, 30, 50, 60
    #[serde(default = "default_camera_frame_rate")]
    pub frame_rate: FrameRate,

    #[serde(default)]
    pub codec: VideoCodec,

    /// Capture in the log color space when the format allows it
    #[serde(default)]
    pub log_color: bool,

    /// Overall magnification to start at; selects a lens when one matches
    #[serde(default = "default_initial_zoom")]
    pub initial_zoom: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct LutConfig {
    /// `.cube` or `.3dl` file loaded at startup
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct OrientationConfig {
    /// Which landscape orientation the sensor reads out upright
    #[serde(default)]
    pub sensor_mount: SensorMount,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecordingConfig {
    /// Where clips are written while recording
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Where finished clips are moved to
    #[serde(default = "default_library_dir")]
    pub library_dir: PathBuf,

    /// Record a microphone track
    #[serde(default = "default_audio_enabled")]
    pub audio_enabled: bool,

    /// IANA timezone name used for clip file names
    #[serde(default = "default_timestamp_timezone")]
    pub timestamp_timezone: String,

    /// Write a JSON sidecar next to each clip
    #[serde(default = "default_save_metadata")]
    pub save_metadata: bool,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Frames buffered between the sensor and the processing pipeline
    #[serde(default = "default_frame_queue_depth")]
    pub frame_queue_depth: usize,

    /// How often frame statistics are published
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

impl SystemConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

impl CinecamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("cinecam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.position", "back")?
            .set_default(
                "camera.resolution",
                vec![
                    default_camera_resolution().0 as i64,
                    default_camera_resolution().1 as i64,
                ],
            )?
            .set_default("camera.frame_rate", default_camera_frame_rate().to_string())?
            .set_default("camera.codec", "hevc")?
            .set_default("camera.log_color", false)?
            .set_default("camera.initial_zoom", default_initial_zoom())?
            .set_default("orientation.sensor_mount", "landscape_right_native")?
            .set_default(
                "recording.scratch_dir",
                default_scratch_dir().to_string_lossy().into_owned(),
            )?
            .set_default(
                "recording.library_dir",
                default_library_dir().to_string_lossy().into_owned(),
            )?
            .set_default("recording.audio_enabled", default_audio_enabled())?
            .set_default("recording.timestamp_timezone", default_timestamp_timezone())?
            .set_default("recording.save_metadata", default_save_metadata())?
            .set_default("recording.file_prefix", default_file_prefix())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.frame_queue_depth",
                default_frame_queue_depth() as i64,
            )?
            .set_default(
                "system.stats_interval_ms",
                default_stats_interval_ms() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(Environment::with_prefix("CINECAM").separator("_"))
            .build()?;

        let config: CinecamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if !(self.camera.initial_zoom > 0.0) {
            return Err(ConfigError::Message(
                "Camera initial_zoom must be greater than 0".to_string(),
            ));
        }

        if self.recording.file_prefix.is_empty() {
            return Err(ConfigError::Message(
                "Recording file_prefix must not be empty".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.frame_queue_depth == 0 {
            return Err(ConfigError::Message(
                "Frame queue depth must be greater than 0".to_string(),
            ));
        }

        if self.system.stats_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Statistics interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for CinecamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                position: default_camera_position(),
                resolution: default_camera_resolution(),
                frame_rate: default_camera_frame_rate(),
                codec: VideoCodec::default(),
                log_color: false,
                initial_zoom: default_initial_zoom(),
            },
            lut: LutConfig::default(),
            orientation: OrientationConfig::default(),
            recording: RecordingConfig {
                scratch_dir: default_scratch_dir(),
                library_dir: default_library_dir(),
                audio_enabled: default_audio_enabled(),
                timestamp_timezone: default_timestamp_timezone(),
                save_metadata: default_save_metadata(),
                file_prefix: default_file_prefix(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                frame_queue_depth: default_frame_queue_depth(),
                stats_interval_ms: default_stats_interval_ms(),
            },
        }
    }
}

// Default value functions
fn default_camera_position() -> DevicePosition {
    DevicePosition::Back
}
fn default_camera_resolution() -> (u32, u32) {
    (1920, 1080)
}
fn default_camera_frame_rate() -> FrameRate {
    FrameRate::Fps24
}
fn default_initial_zoom() -> f64 {
    1.0
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("cinecam")
}
fn default_library_dir() -> PathBuf {
    PathBuf::from("./library")
}
fn default_audio_enabled() -> bool {
    true
}
fn default_timestamp_timezone() -> String {
    "UTC".to_string()
}
fn default_save_metadata() -> bool {
    true
}
fn default_file_prefix() -> String {
    "CINE".to_string()
}

fn default_event_bus_capacity() -> usize {
    256
}
fn default_frame_queue_depth() -> usize {
    4
}
fn default_stats_interval_ms() -> u64 {
    1000
}
