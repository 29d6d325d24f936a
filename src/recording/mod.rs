//! Recording state machine.
//!
//! `Idle → Starting → Writing → Stopping → Idle`. Frames are offered from the
//! delivery threads through [`RecordingSession::append_video`] and
//! [`RecordingSession::append_audio`], which never block on the writer and
//! never return errors; a writer failure ends the attempt and is published on
//! the event bus.

mod mock;
mod settings;
mod writer;

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
mod gst;


pub use mock::{MockBehaviour, MockWriterFactory, MockWriterLog, WrittenSample};
pub use settings::{AudioSettings, ColorPrimaries, HevcProfile, VideoCodec, VideoSettings};
pub use writer::{AssetWriter, Track, WriterConfig, WriterFactory};

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
pub use gst::GstWriterFactory;

use crate::device::{FormatDescriptor, FrameRate};
use crate::error::{CameraError, WriterError};
use crate::events::{CameraEvent, EventBus};
use crate::frame::{AudioFrame, FrameData, Rotation};
use crate::library::{ClipMetadata, MediaLibrary};
use crate::lut::ColorCube;
use crate::orientation::OrientationCoordinator;
use crate::thumbnail::Thumbnail;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RecordingState {
    #[default]
    Idle,
    Starting,
    Writing,
    Stopping,
}

/// What happened to a sample offered to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Not written because the input was busy or the sample was out of order
    Dropped,
    /// No recording is accepting samples
    Rejected,
    /// The writer failed; the recording attempt was abandoned
    Failed,
}

/// Per-clip sample counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingStats {
    pub video_appended: u64,
    pub video_dropped: u64,
    pub audio_appended: u64,
    pub audio_dropped: u64,
    pub first_video_pts: Option<Duration>,
    pub last_video_end: Option<Duration>,
}

impl RecordingStats {
    /// Presentation span of the written video
    pub fn duration(&self) -> Duration {
        match (self.first_video_pts, self.last_video_end) {
            (Some(first), Some(end)) => end.saturating_sub(first),
            _ => Duration::ZERO,
        }
    }
}

/// Capture parameters in effect when a recording starts
#[derive(Debug, Clone)]
pub struct RecordingRequest {
    pub device_id: String,
    pub format: FormatDescriptor,
    pub frame_rate: FrameRate,
    pub codec: VideoCodec,
    pub log_color: bool,
    pub lut: Option<Arc<ColorCube>>,
    pub audio: bool,
}

/// A clip that reached the media library
#[derive(Debug, Clone)]
pub struct FinishedRecording {
    pub location: PathBuf,
    pub duration: Duration,
    pub stats: RecordingStats,
    pub thumbnail: Option<Thumbnail>,
}

struct ActiveClip {
    writer: Box<dyn AssetWriter>,
    scratch_path: PathBuf,
    rotation: Rotation,
    audio: bool,
    /// The clip's color tags were derived for LUT-rendered frames
    graded: bool,
    metadata: ClipMetadata,
    session_start: Option<Duration>,
    last_video_pts: Option<Duration>,
    last_audio_pts: Option<Duration>,
    first_frame: Option<FrameData>,
    stats: RecordingStats,
}

impl ActiveClip {
    fn start_timeline(&mut self, at: Duration) -> Result<(), WriterError> {
        self.writer.start_session(at)?;
        self.session_start = Some(at);
        debug!("Writer session started at {:?}", at);
        Ok(())
    }

    /// Order and readiness gate for a video frame. A refused frame is
    /// counted as dropped.
    fn admits_video(&mut self, frame: &FrameData) -> bool {
        if matches!(self.last_video_pts, Some(last) if frame.pts <= last) {
            trace!("Dropping out-of-order video frame {} at {:?}", frame.id, frame.pts);
            self.stats.video_dropped += 1;
            return false;
        }
        if !self.writer.is_ready(Track::Video) {
            trace!("Video input busy, dropping frame {}", frame.id);
            self.stats.video_dropped += 1;
            return false;
        }
        true
    }

    fn push_video(&mut self, frame: &FrameData) -> Result<AppendOutcome, WriterError> {
        if !self.admits_video(frame) {
            return Ok(AppendOutcome::Dropped);
        }
        self.write_video(frame)
    }

    fn write_video(&mut self, frame: &FrameData) -> Result<AppendOutcome, WriterError> {
        self.writer.append_video(frame)?;
        self.last_video_pts = Some(frame.pts);
        self.stats.video_appended += 1;
        self.stats.first_video_pts.get_or_insert(frame.pts);
        self.stats.last_video_end = Some(frame.end());
        if self.first_frame.is_none() {
            self.first_frame = Some(frame.clone());
        }
        Ok(AppendOutcome::Appended)
    }

    fn push_audio(&mut self, frame: &AudioFrame) -> Result<AppendOutcome, WriterError> {
        let Some(start) = self.session_start else {
            return Ok(AppendOutcome::Rejected);
        };
        if frame.pts + frame.duration <= start {
            return Ok(AppendOutcome::Rejected);
        }
        if matches!(self.last_audio_pts, Some(last) if frame.pts <= last)
            || !self.writer.is_ready(Track::Audio)
        {
            trace!("Dropping audio buffer at {:?}", frame.pts);
            self.stats.audio_dropped += 1;
            return Ok(AppendOutcome::Dropped);
        }

        self.writer.append_audio(frame)?;
        self.last_audio_pts = Some(frame.pts);
        self.stats.audio_appended += 1;
        Ok(AppendOutcome::Appended)
    }
}

struct SessionState {
    state: RecordingState,
    clip: Option<ActiveClip>,
}

/// Muxes processed video and audio into a clip and hands it to the library
pub struct RecordingSession {
    shared: Mutex<SessionState>,
    factory: Arc<dyn WriterFactory>,
    library: Arc<dyn MediaLibrary>,
    orientation: Arc<OrientationCoordinator>,
    events: EventBus,
    scratch_dir: PathBuf,
    /// Runs scratch cleanup for attempts that fail on a delivery thread
    runtime: Option<Handle>,
}

impl RecordingSession {
    pub fn new(
        factory: Arc<dyn WriterFactory>,
        library: Arc<dyn MediaLibrary>,
        orientation: Arc<OrientationCoordinator>,
        events: EventBus,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            shared: Mutex::new(SessionState {
                state: RecordingState::Idle,
                clip: None,
            }),
            factory,
            library,
            orientation,
            events,
            scratch_dir: scratch_dir.into(),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn state(&self) -> RecordingState {
        self.shared.lock().state
    }

    pub fn is_recording(&self) -> bool {
        self.state() != RecordingState::Idle
    }

    /// Whether the clip in progress was started with a LUT. `None` when no
    /// clip is open.
    pub fn clip_graded(&self) -> Option<bool> {
        self.shared.lock().clip.as_ref().map(|clip| clip.graded)
    }

    /// Counters of the clip in progress
    pub fn stats(&self) -> Option<RecordingStats> {
        self.shared.lock().clip.as_ref().map(|clip| clip.stats.clone())
    }

    /// `Idle → Starting`: allocate the scratch file and writer, bind the rotation
    pub async fn start(&self, request: RecordingRequest) -> Result<(), CameraError> {
        {
            let mut shared = self.shared.lock();
            if shared.state != RecordingState::Idle {
                return Err(CameraError::recording(format!(
                    "cannot start a recording while {:?}",
                    shared.state
                )));
            }
            shared.state = RecordingState::Starting;
        }
        self.publish_state(RecordingState::Starting);

        if let Err(e) = tokio::fs::create_dir_all(&self.scratch_dir).await {
            let error = CameraError::recording(format!(
                "Failed to create scratch directory {}: {}",
                self.scratch_dir.display(),
                e
            ));
            return Err(self.abandon(None, error));
        }

        let rotation = self.orientation.lock_for_recording();
        let settings = VideoSettings::derive(
            &request.format,
            request.frame_rate,
            request.codec,
            request.log_color,
            request.lut.is_some(),
            rotation,
        );
        let clip_id = Uuid::new_v4().to_string();
        let config = WriterConfig {
            path: self.scratch_dir.join(format!("{}.mov", clip_id)),
            video: settings,
            pixel_format: request.format.pixel_format,
            audio: request.audio.then(AudioSettings::default),
        };

        let writer = self.factory.create(&config).and_then(|mut writer| {
            writer.begin()?;
            Ok(writer)
        });
        let writer = match writer {
            Ok(writer) => writer,
            Err(e) => {
                let error = CameraError::recording(e.to_string());
                return Err(self.abandon(None, error));
            }
        };

        let metadata = ClipMetadata {
            clip_id,
            recorded_at: chrono::Utc::now(),
            device_id: request.device_id.clone(),
            width: request.format.width,
            height: request.format.height,
            frame_rate: request.frame_rate,
            codec: request.codec,
            log_color: request.log_color,
            lut: request.lut.as_deref().map(describe_lut),
            rotation_degrees: rotation.degrees(),
            duration_secs: 0.0,
            video_frames: 0,
            dropped_video_frames: 0,
            has_audio: request.audio,
        };

        info!(
            "Recording starting: {} {}x{} @ {}fps, {}°{}, writer {}",
            config.video.codec,
            config.video.width,
            config.video.height,
            config.video.frame_rate,
            rotation.degrees(),
            if request.audio { ", with audio" } else { "" },
            self.factory.name()
        );

        self.shared.lock().clip = Some(ActiveClip {
            writer,
            scratch_path: config.path,
            rotation,
            audio: request.audio,
            graded: request.lut.is_some(),
            metadata,
            session_start: None,
            last_video_pts: None,
            last_audio_pts: None,
            first_frame: None,
            stats: RecordingStats::default(),
        });
        Ok(())
    }

    /// Offer a processed video frame. The first accepted frame moves the
    /// session from `Starting` to `Writing`.
    pub fn append_video(&self, frame: &FrameData) -> AppendOutcome {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        let Some(clip) = shared.clip.as_mut() else {
            return AppendOutcome::Rejected;
        };

        let mut began_writing = false;
        let result = match shared.state {
            RecordingState::Idle | RecordingState::Stopping => return AppendOutcome::Rejected,
            // The timeline is anchored on the first frame the writer takes
            RecordingState::Starting => {
                if !clip.admits_video(frame) {
                    return AppendOutcome::Dropped;
                }
                clip.start_timeline(frame.pts).and_then(|_| {
                    began_writing = true;
                    clip.write_video(frame)
                })
            }
            RecordingState::Writing => clip.push_video(frame),
        };

        match result {
            Ok(outcome) => {
                if began_writing {
                    shared.state = RecordingState::Writing;
                    drop(guard);
                    info!("Recording writing from {:?}", frame.pts);
                    self.publish_state(RecordingState::Writing);
                }
                outcome
            }
            Err(e) => {
                shared.state = RecordingState::Idle;
                let clip = shared.clip.take();
                drop(guard);
                self.abandon(clip, CameraError::recording(e.to_string()));
                AppendOutcome::Failed
            }
        }
    }

    /// Offer an audio buffer; only accepted while `Writing`
    pub fn append_audio(&self, frame: &AudioFrame) -> AppendOutcome {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        if shared.state != RecordingState::Writing {
            return AppendOutcome::Rejected;
        }
        let Some(clip) = shared.clip.as_mut().filter(|clip| clip.audio) else {
            return AppendOutcome::Rejected;
        };

        match clip.push_audio(frame) {
            Ok(outcome) => outcome,
            Err(e) => {
                shared.state = RecordingState::Idle;
                let clip = shared.clip.take();
                drop(guard);
                self.abandon(clip, CameraError::recording(e.to_string()));
                AppendOutcome::Failed
            }
        }
    }

    /// `Writing → Stopping → Idle`: finish the tracks, finalize, hand the
    /// file to the library and derive the thumbnail. Returns `None` when
    /// nothing was recording.
    pub async fn stop(&self) -> Result<Option<FinishedRecording>, CameraError> {
        let mut clip = {
            let mut shared = self.shared.lock();
            match shared.state {
                RecordingState::Idle => return Ok(None),
                RecordingState::Stopping => {
                    return Err(CameraError::recording("recording is already stopping"))
                }
                RecordingState::Starting => {
                    let Some(clip) = shared.clip.take() else {
                        return Err(CameraError::recording("recording is still starting"));
                    };
                    shared.state = RecordingState::Idle;
                    drop(shared);
                    return Err(self.abandon(
                        Some(clip),
                        CameraError::recording("no frames were recorded"),
                    ));
                }
                RecordingState::Writing => {
                    shared.state = RecordingState::Stopping;
                    match shared.clip.take() {
                        Some(clip) => clip,
                        None => {
                            shared.state = RecordingState::Idle;
                            return Err(CameraError::recording("no active clip"));
                        }
                    }
                }
            }
        };

        self.publish_state(RecordingState::Stopping);
        self.events.emit(CameraEvent::Processing { active: true });

        clip.writer.mark_finished(Track::Video);
        if clip.audio {
            clip.writer.mark_finished(Track::Audio);
        }
        let result = self.finalize(clip).await;

        self.shared.lock().state = RecordingState::Idle;
        self.release_orientation();
        self.publish_state(RecordingState::Idle);
        self.events.emit(CameraEvent::Processing { active: false });

        match result {
            Ok(finished) => {
                self.events.emit(CameraEvent::RecordingSaved {
                    location: finished.location.clone(),
                    duration: finished.duration,
                });
                if let Some(thumbnail) = &finished.thumbnail {
                    self.events.emit(CameraEvent::ThumbnailReady {
                        thumbnail: thumbnail.clone(),
                    });
                }
                Ok(Some(finished))
            }
            Err(error) => {
                self.events.emit(CameraEvent::Error {
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn finalize(&self, clip: ActiveClip) -> Result<FinishedRecording, CameraError> {
        let ActiveClip {
            writer,
            scratch_path,
            rotation,
            mut metadata,
            first_frame,
            stats,
            ..
        } = clip;

        let written = match writer.finish().await {
            Ok(path) => path,
            Err(e) => {
                discard_scratch(&scratch_path).await;
                return Err(CameraError::recording(e.to_string()));
            }
        };

        let duration = stats.duration();
        metadata.duration_secs = duration.as_secs_f64();
        metadata.video_frames = stats.video_appended;
        metadata.dropped_video_frames = stats.video_dropped;

        let location = match self.library.save(&written, &metadata).await {
            Ok(location) => location,
            Err(e) => {
                discard_scratch(&written).await;
                return Err(e);
            }
        };

        let thumbnail = match first_frame {
            Some(frame) => {
                match tokio::task::spawn_blocking(move || Thumbnail::from_frame(&frame, rotation))
                    .await
                {
                    Ok(Ok(thumbnail)) => Some(thumbnail),
                    Ok(Err(e)) => {
                        warn!("Failed to derive thumbnail: {}", e);
                        None
                    }
                    Err(e) => {
                        warn!("Thumbnail task failed: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        info!(
            "Recording finished: {} frames ({} dropped), {:.2}s",
            stats.video_appended,
            stats.video_dropped,
            duration.as_secs_f64()
        );
        Ok(FinishedRecording {
            location,
            duration,
            stats,
            thumbnail,
        })
    }

    /// Tear down a failed attempt. Releases the writer and the orientation
    /// lock, schedules the partial file for deletion and publishes the error.
    fn abandon(&self, clip: Option<ActiveClip>, error: CameraError) -> CameraError {
        {
            let mut shared = self.shared.lock();
            shared.state = RecordingState::Idle;
            shared.clip = None;
        }
        if let Some(clip) = clip {
            let ActiveClip {
                writer,
                scratch_path,
                stats,
                ..
            } = clip;
            writer.cancel();
            self.discard_later(scratch_path);
            debug!("Abandoned clip stats: {:?}", stats);
        }
        self.release_orientation();
        self.publish_state(RecordingState::Idle);
        self.events.emit(CameraEvent::Error {
            error: error.clone(),
        });
        error
    }

    /// Delete a scratch file off the calling thread
    fn discard_later(&self, path: PathBuf) {
        match &self.runtime {
            Some(runtime) => {
                runtime.spawn(async move { discard_scratch(&path).await });
            }
            None => {
                let spawned = std::thread::Builder::new()
                    .name("scratch-cleanup".to_string())
                    .spawn(move || {
                        if let Err(e) = std::fs::remove_file(&path) {
                            if e.kind() != std::io::ErrorKind::NotFound {
                                warn!("Failed to discard {}: {}", path.display(), e);
                            }
                        }
                    });
                if let Err(e) = spawned {
                    warn!("Failed to spawn scratch cleanup: {}", e);
                }
            }
        }
    }

    /// Unlock the orientation and fold in whatever was reported while locked
    fn release_orientation(&self) {
        let (_, pending) = self.orientation.unlock();
        if let Some(orientation) = pending {
            self.orientation.update(orientation);
        }
    }

    fn publish_state(&self, state: RecordingState) {
        self.events
            .emit(CameraEvent::RecordingStateChanged { state });
    }
}

fn describe_lut(cube: &ColorCube) -> String {
    cube.title()
        .map(str::to_string)
        .or_else(|| {
            cube.source()
                .and_then(|path| path.file_name())
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| format!("{}³ LUT", cube.size()))
}

async fn discard_scratch(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to discard {}: {}", path.display(), e);
        }
    }
}
