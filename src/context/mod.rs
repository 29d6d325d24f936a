//! Composition root: builds every component from configuration and exposes
//! the collaborator commands as plain async methods.
//!
//! Commands return a typed [`CameraError`] and also publish it on the event
//! bus, so observers of the [`CameraState`] snapshot see the last failure.

#[cfg(test)]
mod tests;

use crate::config::CinecamConfig;
use crate::device::{CaptureDevice, DeviceBackend, FrameRate};
use crate::error::CameraError;
use crate::events::{CameraEvent, EventBus};
use crate::format::FormatRequest;
use crate::lens::{LensCoordinator, LensSwitch};
use crate::library::MediaLibrary;
use crate::lut::{self, ColorCube, LutSlot};
use crate::orientation::{InterfaceOrientation, OrientationCoordinator, OrientationUpdate};
use crate::permissions::{Authorization, PermissionGate, Resource};
use crate::pipeline::{FrameProcessingPipeline, FrameSink, PreviewSink};
use crate::recording::{
    FinishedRecording, RecordingRequest, RecordingSession, VideoCodec, WriterFactory,
};
use crate::session::{CaptureParameters, CaptureSessionController, SessionSettings};
use crate::state::{CameraState, StateStore};
use parking_lot::Mutex as SyncMutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Platform collaborators the context is built on
pub struct ContextParts {
    pub backend: Arc<dyn DeviceBackend>,
    pub writers: Arc<dyn WriterFactory>,
    pub library: Arc<dyn MediaLibrary>,
    pub permissions: Arc<dyn PermissionGate>,
}

pub struct CameraContext {
    events: EventBus,
    state: StateStore,
    lut: Arc<LutSlot>,
    recording: Arc<RecordingSession>,
    pipeline: Arc<FrameProcessingPipeline>,
    session: Arc<CaptureSessionController>,
    lenses: LensCoordinator,
    codec: SyncMutex<VideoCodec>,
    audio: bool,
    /// Held by recording start/stop, format and LUT changes so neither
    /// changes under a clip
    commands: Mutex<()>,
}

impl CameraContext {
    /// Check permissions, build the component graph and configure the
    /// capture input. The session is left stopped.
    pub async fn open(config: &CinecamConfig, parts: ContextParts) -> Result<Self, CameraError> {
        let ContextParts {
            backend,
            writers,
            library,
            permissions,
        } = parts;

        let events = EventBus::new(config.system.event_bus_capacity);

        if permissions.request(Resource::Camera).await != Authorization::Authorized {
            let error = CameraError::Unauthorized {
                resource: Resource::Camera.to_string(),
            };
            events.emit(CameraEvent::Error {
                error: error.clone(),
            });
            return Err(error);
        }

        let audio = config.recording.audio_enabled
            && match permissions.request(Resource::Microphone).await {
                Authorization::Authorized => true,
                other => {
                    warn!("Microphone access {:?}, recording without audio", other);
                    false
                }
            };

        let orientation = Arc::new(OrientationCoordinator::new(
            config.orientation.sensor_mount,
            InterfaceOrientation::Portrait,
        ));
        let lut = Arc::new(LutSlot::new());
        let recording = Arc::new(RecordingSession::new(
            writers,
            library,
            Arc::clone(&orientation),
            events.clone(),
            config.recording.scratch_dir.clone(),
        ));
        let state = StateStore::spawn_with_resync(&events, {
            let recording = Arc::clone(&recording);
            let orientation = Arc::clone(&orientation);
            let lut = Arc::clone(&lut);
            move |state: &mut CameraState| {
                state.recording_state = recording.state();
                state.recording = recording.is_recording();
                state.rotation = Some(orientation.current_angle());
                let cube = lut.current();
                state.lut_active = cube.is_some();
                state.lut_title = cube.and_then(|cube| cube.title().map(str::to_string));
            }
        });
        let pipeline = Arc::new(FrameProcessingPipeline::new(
            Arc::clone(&lut),
            Arc::clone(&recording),
            events.clone(),
            config.system.stats_interval(),
        ));
        let session = CaptureSessionController::new(
            backend,
            orientation,
            events.clone(),
            Arc::clone(&pipeline) as Arc<dyn FrameSink>,
            SessionSettings {
                position: config.camera.position,
                resolution: config.camera.resolution,
                frame_rate: config.camera.frame_rate,
                log_color: config.camera.log_color,
                audio,
                frame_queue_depth: config.system.frame_queue_depth,
            },
        );
        let lenses = LensCoordinator::new(Arc::clone(&session));

        let context = Self {
            events,
            state,
            lut,
            recording,
            pipeline,
            session,
            lenses,
            codec: SyncMutex::new(config.camera.codec),
            audio,
            commands: Mutex::new(()),
        };

        let params = context.report(context.session.setup().await)?;
        info!(
            "Camera context ready on {} ({}), audio {}",
            params.device.id,
            params.format,
            if audio { "enabled" } else { "disabled" }
        );

        if let Some(path) = &config.lut.path {
            if let Err(e) = context.load_lut(path).await {
                warn!("Startup LUT {} not loaded: {}", path.display(), e);
            }
        }
        if (config.camera.initial_zoom - 1.0).abs() > f64::EPSILON {
            if let Err(e) = context.switch_lens(config.camera.initial_zoom).await {
                warn!("Initial zoom {:.2}x not applied: {}", config.camera.initial_zoom, e);
            }
        }

        Ok(context)
    }

    pub async fn start_session(&self) -> Result<(), CameraError> {
        self.report(self.session.start().await)
    }

    pub async fn stop_session(&self) {
        self.session.stop().await;
    }

    /// Start recording with the active format, LUT and codec
    pub async fn start_recording(&self) -> Result<(), CameraError> {
        let _guard = self.commands.lock().await;
        if !self.session.is_running().await {
            return self.report(Err(CameraError::recording(
                "capture session is not running",
            )));
        }
        let params = self.require_parameters().await?;

        let request = RecordingRequest {
            device_id: params.device.id,
            format: params.format,
            frame_rate: params.frame_rate,
            codec: *self.codec.lock(),
            log_color: params.log_color,
            lut: self.lut.current(),
            audio: self.audio,
        };
        // The recording session publishes its own failures
        self.recording.start(request).await
    }

    /// Stop recording and wait for the clip to reach the library.
    /// `Ok(None)` when nothing was recording.
    pub async fn stop_recording(&self) -> Result<Option<FinishedRecording>, CameraError> {
        let _guard = self.commands.lock().await;
        self.recording.stop().await
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_recording()
    }

    pub async fn set_resolution(&self, width: u32, height: u32) -> Result<(), CameraError> {
        self.change_format(|request| {
            request.width = width;
            request.height = height;
        })
        .await
    }

    pub async fn set_frame_rate(&self, frame_rate: FrameRate) -> Result<(), CameraError> {
        self.change_format(|request| request.frame_rate = frame_rate)
            .await
    }

    pub async fn set_log_color(&self, enabled: bool) -> Result<(), CameraError> {
        self.change_format(|request| request.log_color = enabled)
            .await
    }

    /// Codec for the next recording
    pub async fn set_codec(&self, codec: VideoCodec) -> Result<(), CameraError> {
        let _guard = self.commands.lock().await;
        if self.recording.is_recording() {
            return self.report(Err(CameraError::configuration(
                "cannot change codec while recording",
            )));
        }
        *self.codec.lock() = codec;
        info!("Recording codec set to {}", codec);
        Ok(())
    }

    pub fn codec(&self) -> VideoCodec {
        *self.codec.lock()
    }

    /// Read a LUT file off the frame path and make it the active grade.
    /// While recording, one LUT may replace another but an ungraded clip
    /// cannot gain one.
    pub async fn load_lut(&self, path: impl AsRef<Path>) -> Result<Arc<ColorCube>, CameraError> {
        let _guard = self.commands.lock().await;
        if self.recording.clip_graded() == Some(false) {
            return self.report(Err(CameraError::configuration(
                "cannot add a LUT while recording an ungraded clip",
            )));
        }
        let path = path.as_ref();
        let cube = match lut::load(path).await {
            Ok(cube) => Arc::new(cube),
            Err(e) => {
                return self.report(Err(CameraError::configuration(e.to_string())));
            }
        };

        self.lut.replace(Some(Arc::clone(&cube)));
        self.events.emit(CameraEvent::LutChanged {
            active: true,
            title: cube.title().map(str::to_string),
            size: Some(cube.size()),
        });
        Ok(cube)
    }

    /// Drop the active grade. Refused while a graded clip is recording.
    pub async fn clear_lut(&self) -> Result<(), CameraError> {
        let _guard = self.commands.lock().await;
        if self.recording.clip_graded() == Some(true) {
            return self.report(Err(CameraError::configuration(
                "cannot clear the LUT while recording a graded clip",
            )));
        }
        if self.lut.clear().is_some() {
            debug!("LUT cleared");
        }
        self.events.emit(CameraEvent::LutChanged {
            active: false,
            title: None,
            size: None,
        });
        Ok(())
    }

    /// Overall magnification: swaps lenses when one matches, digital zoom
    /// otherwise. While recording only digital zoom is used so the clip's
    /// input never changes.
    pub async fn switch_lens(&self, factor: f64) -> Result<LensSwitch, CameraError> {
        let result = if self.recording.is_recording() {
            self.lenses.zoom_within_lens(factor).await
        } else {
            self.lenses.switch_to_lens(factor).await
        };
        self.report(result)
    }

    /// Digital zoom on the current lens, clamped to its range
    pub async fn set_zoom(&self, zoom: f64) -> Result<f64, CameraError> {
        self.report(self.lenses.set_zoom(zoom).await)
    }

    pub async fn report_orientation(&self, orientation: InterfaceOrientation) -> OrientationUpdate {
        self.session.report_orientation(orientation).await
    }

    pub async fn set_white_balance(&self, kelvin: f32) -> Result<(), CameraError> {
        self.report(self.session.set_white_balance(kelvin).await)
    }

    pub async fn set_torch(&self, level: f32) -> Result<(), CameraError> {
        self.report(self.session.set_torch(level).await)
    }

    pub fn set_preview(&self, preview: Option<Arc<dyn PreviewSink>>) {
        self.pipeline.set_preview(preview);
    }

    pub async fn parameters(&self) -> Option<CaptureParameters> {
        self.session.parameters().await
    }

    pub fn devices(&self) -> Vec<CaptureDevice> {
        self.session.devices()
    }

    pub fn snapshot(&self) -> CameraState {
        self.state.snapshot()
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Finish any recording in progress and stop the capture session
    pub async fn shutdown(&self) {
        if self.recording.is_recording() {
            info!("Finishing recording before shutdown");
            if let Err(e) = self.stop_recording().await {
                warn!("Recording ended with an error during shutdown: {}", e);
            }
        }
        self.session.shutdown().await;
        info!("Camera context shut down");
    }

    async fn change_format<F>(&self, modify: F) -> Result<(), CameraError>
    where
        F: FnOnce(&mut FormatRequest),
    {
        let _guard = self.commands.lock().await;
        if self.recording.is_recording() {
            return self.report(Err(CameraError::configuration(
                "cannot change format while recording",
            )));
        }
        let mut request = self.session.current_request().await;
        modify(&mut request);
        self.report(self.session.set_format(request).await.map(|_| ()))
    }

    async fn require_parameters(&self) -> Result<CaptureParameters, CameraError> {
        match self.session.parameters().await {
            Some(params) => Ok(params),
            None => self.report(Err(CameraError::setup_failed(
                "session has no input device",
            ))),
        }
    }

    fn report<T>(&self, result: Result<T, CameraError>) -> Result<T, CameraError> {
        if let Err(error) = &result {
            self.events.emit(CameraEvent::Error {
                error: error.clone(),
            });
        }
        result
    }
}
