use super::writer::{AssetWriter, Track, WriterConfig, WriterFactory};
use crate::error::WriterError;
use crate::frame::{AudioFrame, FrameData, PixelFormat};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A video sample as the writer received it
#[derive(Debug, Clone)]
pub struct WrittenSample {
    pub id: u64,
    pub pts: Duration,
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Arc<Vec<u8>>,
}

/// Everything the mock writers produced, shared with the test
#[derive(Debug, Default)]
pub struct MockWriterLog {
    pub configs: Vec<WriterConfig>,
    pub began: u32,
    pub session_start: Option<Duration>,
    pub video: Vec<WrittenSample>,
    /// (pts, sample frames) per audio buffer
    pub audio: Vec<(Duration, usize)>,
    pub finished_tracks: Vec<Track>,
    pub finalized: Vec<PathBuf>,
    pub cancelled: u32,
}

impl MockWriterLog {
    /// Presentation span covered by the written video track
    pub fn video_duration(&self) -> Duration {
        match (self.video.first(), self.video.last()) {
            (Some(first), Some(last)) => (last.pts + last.duration).saturating_sub(first.pts),
            _ => Duration::ZERO,
        }
    }
}

/// Failure and readiness injection
#[derive(Debug, Clone, Default)]
pub struct MockBehaviour {
    pub fail_create: bool,
    pub fail_begin: bool,
    /// Fail the append after this many video frames were written
    pub fail_video_after: Option<usize>,
    pub fail_finish: bool,
    /// Report the video input busy on every n-th readiness check
    pub video_busy_every: Option<u64>,
    pub audio_busy: bool,
}

/// Factory for in-memory writers. Finalized files contain a short text
/// summary instead of encoded media.
#[derive(Clone, Default)]
pub struct MockWriterFactory {
    log: Arc<Mutex<MockWriterLog>>,
    behaviour: Arc<Mutex<MockBehaviour>>,
}

impl MockWriterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Arc<Mutex<MockWriterLog>> {
        Arc::clone(&self.log)
    }

    pub fn set_behaviour(&self, behaviour: MockBehaviour) {
        *self.behaviour.lock() = behaviour;
    }

    pub fn behaviour(&self) -> MockBehaviour {
        self.behaviour.lock().clone()
    }
}

impl WriterFactory for MockWriterFactory {
    fn create(&self, config: &WriterConfig) -> Result<Box<dyn AssetWriter>, WriterError> {
        if self.behaviour.lock().fail_create {
            return Err(WriterError::Create {
                details: "injected create failure".to_string(),
            });
        }
        self.log.lock().configs.push(config.clone());
        Ok(Box::new(MockAssetWriter {
            config: config.clone(),
            log: Arc::clone(&self.log),
            behaviour: Arc::clone(&self.behaviour),
            ready_checks: AtomicU64::new(0),
            written: 0,
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockAssetWriter {
    config: WriterConfig,
    log: Arc<Mutex<MockWriterLog>>,
    behaviour: Arc<Mutex<MockBehaviour>>,
    ready_checks: AtomicU64,
    written: usize,
}

#[async_trait]
impl AssetWriter for MockAssetWriter {
    fn begin(&mut self) -> Result<(), WriterError> {
        if self.behaviour.lock().fail_begin {
            return Err(WriterError::Start {
                details: "injected start failure".to_string(),
            });
        }
        self.log.lock().began += 1;
        Ok(())
    }

    fn start_session(&mut self, at: Duration) -> Result<(), WriterError> {
        self.log.lock().session_start = Some(at);
        Ok(())
    }

    fn is_ready(&self, track: Track) -> bool {
        let behaviour = self.behaviour.lock();
        match track {
            Track::Video => {
                let check = self.ready_checks.fetch_add(1, Ordering::SeqCst) + 1;
                !matches!(behaviour.video_busy_every, Some(n) if n > 0 && check % n == 0)
            }
            Track::Audio => !behaviour.audio_busy,
        }
    }

    fn append_video(&mut self, frame: &FrameData) -> Result<(), WriterError> {
        if let Some(limit) = self.behaviour.lock().fail_video_after {
            if self.written >= limit {
                return Err(WriterError::Append {
                    track: Track::Video.to_string(),
                    details: "injected append failure".to_string(),
                });
            }
        }
        self.written += 1;
        self.log.lock().video.push(WrittenSample {
            id: frame.id,
            pts: frame.pts,
            duration: frame.duration,
            width: frame.width,
            height: frame.height,
            format: frame.format,
            data: Arc::clone(&frame.data),
        });
        Ok(())
    }

    fn append_audio(&mut self, frame: &AudioFrame) -> Result<(), WriterError> {
        self.log.lock().audio.push((frame.pts, frame.frame_count()));
        Ok(())
    }

    fn mark_finished(&mut self, track: Track) {
        self.log.lock().finished_tracks.push(track);
    }

    async fn finish(self: Box<Self>) -> Result<PathBuf, WriterError> {
        if self.behaviour.lock().fail_finish {
            return Err(WriterError::Finalize {
                details: "injected finalize failure".to_string(),
            });
        }

        let summary = {
            let log = self.log.lock();
            format!(
                "codec={} size={}x{} video_frames={} audio_buffers={}\n",
                self.config.video.codec,
                self.config.video.width,
                self.config.video.height,
                log.video.len(),
                log.audio.len()
            )
        };
        tokio::fs::write(&self.config.path, summary)
            .await
            .map_err(|e| WriterError::Finalize {
                details: e.to_string(),
            })?;

        debug!("Mock writer finalized {}", self.config.path.display());
        self.log.lock().finalized.push(self.config.path.clone());
        Ok(self.config.path.clone())
    }

    fn cancel(self: Box<Self>) {
        self.log.lock().cancelled += 1;
        let _ = std::fs::remove_file(&self.config.path);
    }
}
