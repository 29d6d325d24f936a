use super::settings::{AudioSettings, VideoSettings};
use crate::error::WriterError;
use crate::frame::{AudioFrame, FrameData, PixelFormat};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Video,
    Audio,
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Track::Video => write!(f, "video"),
            Track::Audio => write!(f, "audio"),
        }
    }
}

/// Everything a writer needs to lay out the container
#[derive(Debug, Clone, PartialEq)]
pub struct WriterConfig {
    pub path: PathBuf,
    pub video: VideoSettings,
    /// Layout of the buffers handed to `append_video`
    pub pixel_format: PixelFormat,
    /// `None` records a video-only file
    pub audio: Option<AudioSettings>,
}

/// Muxer interleaving video and audio samples into a container file.
///
/// Call order: `begin`, `start_session` once with the first frame's
/// timestamp, appends, `mark_finished` per track, then `finish`.
#[async_trait]
pub trait AssetWriter: Send {
    /// Allocate the container and encoders
    fn begin(&mut self) -> Result<(), WriterError>;

    /// Anchor the timeline at a source timestamp
    fn start_session(&mut self, at: Duration) -> Result<(), WriterError>;

    /// Whether `track` can take another sample without queueing
    fn is_ready(&self, track: Track) -> bool;

    fn append_video(&mut self, frame: &FrameData) -> Result<(), WriterError>;

    fn append_audio(&mut self, frame: &AudioFrame) -> Result<(), WriterError>;

    fn mark_finished(&mut self, track: Track);

    /// Drain accepted samples and close the file
    async fn finish(self: Box<Self>) -> Result<PathBuf, WriterError>;

    /// Abandon the file without finalizing it
    fn cancel(self: Box<Self>);
}

pub trait WriterFactory: Send + Sync {
    fn create(&self, config: &WriterConfig) -> Result<Box<dyn AssetWriter>, WriterError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}
