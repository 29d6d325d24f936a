//! Hand-off of finished recordings to permanent storage.

use crate::device::FrameRate;
use crate::error::CameraError;
use crate::recording::VideoCodec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Description of a finished clip, written as a JSON sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipMetadata {
    pub clip_id: String,
    pub recorded_at: DateTime<Utc>,
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub codec: VideoCodec,
    pub log_color: bool,
    pub lut: Option<String>,
    pub rotation_degrees: u16,
    pub duration_secs: f64,
    pub video_frames: u64,
    pub dropped_video_frames: u64,
    pub has_audio: bool,
}

/// Storage collaborator that takes ownership of finalized clips
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Move `clip` into the library and return its new location
    async fn save(&self, clip: &Path, metadata: &ClipMetadata) -> Result<PathBuf, CameraError>;
}

/// Resolve an IANA timezone name, falling back to UTC
pub fn resolve_timestamp_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Unknown timestamp timezone '{}', falling back to UTC", name);
            Tz::UTC
        }
    }
}

/// Library backed by a plain directory
#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    root: PathBuf,
    prefix: String,
    timezone: Tz,
    save_metadata: bool,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>, prefix: &str, timezone: &str, save_metadata: bool) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.to_string(),
            timezone: resolve_timestamp_timezone(timezone),
            save_metadata,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<prefix>_YYYYMMDD_HHMMSS` in the configured timezone
    pub fn clip_stem(&self, recorded_at: DateTime<Utc>) -> String {
        let local = recorded_at.with_timezone(&self.timezone);
        format!("{}_{}", self.prefix, local.format("%Y%m%d_%H%M%S"))
    }

    /// First free `<stem>[_n].mov` in the library
    async fn free_destination(&self, stem: &str) -> PathBuf {
        let mut candidate = self.root.join(format!("{}.mov", stem));
        let mut suffix = 1;
        while fs::try_exists(&candidate).await.unwrap_or(false) {
            candidate = self.root.join(format!("{}_{}.mov", stem, suffix));
            suffix += 1;
        }
        candidate
    }
}

#[async_trait]
impl MediaLibrary for DirectoryLibrary {
    async fn save(&self, clip: &Path, metadata: &ClipMetadata) -> Result<PathBuf, CameraError> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            CameraError::saving(format!(
                "Failed to create library directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let destination = self
            .free_destination(&self.clip_stem(metadata.recorded_at))
            .await;

        if fs::rename(clip, &destination).await.is_err() {
            // Scratch and library may sit on different filesystems
            fs::copy(clip, &destination).await.map_err(|e| {
                CameraError::saving(format!(
                    "Failed to move {} into the library: {}",
                    clip.display(),
                    e
                ))
            })?;
            if let Err(e) = fs::remove_file(clip).await {
                warn!("Failed to remove scratch file {}: {}", clip.display(), e);
            }
        }

        if self.save_metadata {
            let json = serde_json::to_string_pretty(metadata)
                .map_err(|e| CameraError::saving(format!("Failed to serialize metadata: {}", e)))?;
            let sidecar = destination.with_extension("json");
            fs::write(&sidecar, json).await.map_err(|e| {
                CameraError::saving(format!("Failed to write metadata file: {}", e))
            })?;
            debug!("Saved metadata to {}", sidecar.display());
        }

        info!("Saved recording {}", destination.display());
        Ok(destination)
    }
}
