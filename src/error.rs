use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors published to collaborators of the capture core
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CameraError {
    #[error("Camera device unavailable: {details}")]
    DeviceUnavailable { details: String },

    #[error("Capture session setup failed: {details}")]
    SetupFailed { details: String },

    #[error("Configuration failed{}", describe_reason(.reason))]
    ConfigurationFailed { reason: Option<String> },

    #[error("Recording failed: {details}")]
    RecordingFailed { details: String },

    #[error("Saving recording failed: {details}")]
    SavingFailed { details: String },

    #[error("White balance error: {details}")]
    WhiteBalance { details: String },

    #[error("Not authorized to use {resource}")]
    Unauthorized { resource: String },
}

fn describe_reason(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {}", reason),
        None => String::new(),
    }
}

impl CameraError {
    pub fn device_unavailable<S: Into<String>>(details: S) -> Self {
        Self::DeviceUnavailable {
            details: details.into(),
        }
    }

    pub fn setup_failed<S: Into<String>>(details: S) -> Self {
        Self::SetupFailed {
            details: details.into(),
        }
    }

    pub fn configuration<S: Into<String>>(reason: S) -> Self {
        Self::ConfigurationFailed {
            reason: Some(reason.into()),
        }
    }

    pub fn recording<S: Into<String>>(details: S) -> Self {
        Self::RecordingFailed {
            details: details.into(),
        }
    }

    pub fn saving<S: Into<String>>(details: S) -> Self {
        Self::SavingFailed {
            details: details.into(),
        }
    }

    /// Stable identifier used in logs and metadata
    pub fn kind(&self) -> &'static str {
        match self {
            CameraError::DeviceUnavailable { .. } => "device_unavailable",
            CameraError::SetupFailed { .. } => "setup_failed",
            CameraError::ConfigurationFailed { .. } => "configuration_failed",
            CameraError::RecordingFailed { .. } => "recording_failed",
            CameraError::SavingFailed { .. } => "saving_failed",
            CameraError::WhiteBalance { .. } => "white_balance_error",
            CameraError::Unauthorized { .. } => "unauthorized",
        }
    }
}

/// Errors raised while reading or parsing a 3D LUT file
#[derive(Error, Debug)]
pub enum LutError {
    #[error("Failed to read LUT file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported LUT format: {details}")]
    UnsupportedFormat { details: String },

    #[error("Invalid LUT dimension {size} (expected 2..=256)")]
    InvalidDimension { size: usize },

    #[error("Missing LUT dimension declaration")]
    MissingDimension,

    #[error("Malformed LUT line {line}: {details}")]
    Malformed { line: usize, details: String },

    #[error("Inconsistent LUT data: expected {expected} RGB triples, found {found}")]
    TripleCount { expected: usize, found: usize },
}

/// Errors raised by the underlying asset writer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriterError {
    #[error("Writer could not be created: {details}")]
    Create { details: String },

    #[error("Writer failed to start: {details}")]
    Start { details: String },

    #[error("Failed to append {track} sample: {details}")]
    Append { track: String, details: String },

    #[error("Writer failed to finalize: {details}")]
    Finalize { details: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum CinecamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("LUT error: {0}")]
    Lut(#[from] LutError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl CinecamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CinecamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_reason_display() {
        let with_reason = CameraError::configuration("no log-capable format at 3840x2160");
        assert_eq!(
            with_reason.to_string(),
            "Configuration failed: no log-capable format at 3840x2160"
        );

        let without = CameraError::ConfigurationFailed { reason: None };
        assert_eq!(without.to_string(), "Configuration failed");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(CameraError::device_unavailable("x").kind(), "device_unavailable");
        assert_eq!(CameraError::recording("x").kind(), "recording_failed");
        assert_eq!(
            CameraError::Unauthorized {
                resource: "camera".into()
            }
            .kind(),
            "unauthorized"
        );
    }

    #[test]
    fn test_camera_error_converts_into_crate_error() {
        let err: CinecamError = CameraError::saving("disk full").into();
        assert!(matches!(err, CinecamError::Camera(CameraError::SavingFailed { .. })));
        assert_eq!(err.to_string(), "Saving recording failed: disk full");
    }
}
