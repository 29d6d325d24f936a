//! Capture session lifecycle and atomic reconfiguration.
//!
//! Every command locks the session core for its whole duration, which makes
//! the core's mutex the serial configuration queue: a zoom change and a
//! format change issued together run one after the other.

mod core;
mod reconfigure;
#[cfg(test)]
mod tests;

use self::core::{apply_format, connections_for, SessionCore};
use self::reconfigure::Reconfiguration;
use crate::device::{
    CaptureDevice, Connection, DeviceBackend, DeviceLock, DevicePosition, FormatDescriptor,
    FrameRate, OutputKind,
};
use crate::error::CameraError;
use crate::events::{CameraEvent, EventBus};
use crate::format::{FormatCatalog, FormatRequest};
use crate::frame::Rotation;
use crate::orientation::{InterfaceOrientation, OrientationCoordinator, OrientationUpdate};
use crate::pipeline::FrameSink;
use crate::recording::RecordingState;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Accepted white balance range in kelvin
pub const WHITE_BALANCE_RANGE: (f32, f32) = (2_500.0, 8_000.0);

/// Initial session parameters
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub position: DevicePosition,
    pub resolution: (u32, u32),
    pub frame_rate: FrameRate,
    pub log_color: bool,
    pub audio: bool,
    pub frame_queue_depth: usize,
}

/// What the sensor is producing right now
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureParameters {
    pub device: CaptureDevice,
    pub format: FormatDescriptor,
    pub frame_rate: FrameRate,
    pub log_color: bool,
    pub zoom: f64,
}

/// Owns the active input device and its connections
pub struct CaptureSessionController {
    backend: Arc<dyn DeviceBackend>,
    orientation: Arc<OrientationCoordinator>,
    events: EventBus,
    sink: Arc<dyn FrameSink>,
    core: Mutex<SessionCore>,
    position: DevicePosition,
    frame_queue_depth: usize,
    interruptions: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl CaptureSessionController {
    /// Build the controller and its monitor task. Must be called inside a
    /// Tokio runtime.
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        orientation: Arc<OrientationCoordinator>,
        events: EventBus,
        sink: Arc<dyn FrameSink>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let (interruptions, interruption_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let bus = events.subscribe();

        let controller = Arc::new(Self {
            backend,
            orientation,
            events,
            sink,
            core: Mutex::new(SessionCore::new(
                settings.resolution,
                settings.frame_rate,
                settings.log_color,
                settings.audio,
            )),
            position: settings.position,
            frame_queue_depth: settings.frame_queue_depth,
            interruptions,
            cancel: cancel.clone(),
        });

        spawn_monitor(Arc::downgrade(&controller), interruption_rx, bus, cancel);
        controller
    }

    /// Open the default device for the configured position and apply the
    /// initial format. The session is left stopped.
    pub async fn setup(&self) -> Result<CaptureParameters, CameraError> {
        let mut core = self.core.lock().await;
        let device = self.backend.default_device(self.position).ok_or_else(|| {
            CameraError::device_unavailable(format!("no {:?} camera", self.position))
        })?;

        let request = FormatRequest {
            width: core.resolution.0,
            height: core.resolution.1,
            frame_rate: core.frame_rate,
            log_color: core.log_color,
        };
        let format = FormatCatalog::new(&device).select(&request)?;

        let mut handle = self.backend.open(&device.id)?;
        apply_format(handle.as_mut(), &format, request.frame_rate, request.log_color)?;

        let connections = connections_for(&device, core.audio);
        let was_running = core.stop_streaming();
        {
            let mut config = Reconfiguration::begin(&mut core);
            config.connections = connections;
            config.handle = Some(handle);
            config.format = Some(format.clone());
            self.orientation.apply_to(&mut config.connections);
            config.commit();
        }
        if was_running {
            self.restart(&mut core)?;
        }

        info!("Capture input {} configured: {}", device.id, format);
        self.events.emit(CameraEvent::LensChanged {
            device_id: device.id.clone(),
            nominal_zoom: device.nominal_zoom,
            zoom: 1.0,
        });
        self.publish_format(&core);
        self.events.emit(CameraEvent::OrientationChanged {
            rotation: self.orientation.current_angle(),
        });
        parameters(&core).ok_or_else(|| CameraError::setup_failed("session has no input device"))
    }

    /// Start delivering frames; a no-op when already running
    pub async fn start(&self) -> Result<(), CameraError> {
        let mut core = self.core.lock().await;
        if self.restart(&mut core)? {
            self.events.emit(CameraEvent::SessionRunning { running: true });
        }
        Ok(())
    }

    /// Stop delivering frames; a no-op when already stopped
    pub async fn stop(&self) {
        let mut core = self.core.lock().await;
        if core.stop_streaming() {
            self.events.emit(CameraEvent::SessionRunning { running: false });
        }
    }

    pub async fn is_running(&self) -> bool {
        self.core.lock().await.running
    }

    pub async fn parameters(&self) -> Option<CaptureParameters> {
        parameters(&*self.core.lock().await)
    }

    pub async fn connections(&self) -> Vec<Connection> {
        self.core.lock().await.connections.clone()
    }

    /// (begin, commit) counts of configuration brackets so far
    pub async fn reconfiguration_counts(&self) -> (u64, u64) {
        let core = self.core.lock().await;
        (core.begins, core.commits)
    }

    pub fn devices(&self) -> Vec<CaptureDevice> {
        self.backend.devices()
    }

    /// Select and apply the best format for `request`.
    ///
    /// On any failure the previous format stays active and the session keeps
    /// its running state.
    pub async fn set_format(&self, request: FormatRequest) -> Result<FormatDescriptor, CameraError> {
        let mut core = self.core.lock().await;
        let device = core
            .device()
            .cloned()
            .ok_or_else(|| CameraError::setup_failed("session has no input device"))?;
        let format = FormatCatalog::new(&device).select(&request).map_err(|mismatch| {
            warn!("Format request {} rejected: {}", request, mismatch);
            CameraError::from(mismatch)
        })?;

        let previous = core.format.clone();
        let previous_rate = core.frame_rate;
        let previous_log = core.log_color;

        let mut config = Reconfiguration::begin(&mut core);
        let Some(handle) = config.handle.as_deref_mut() else {
            return Err(CameraError::setup_failed("session has no input device"));
        };

        if let Err(e) = apply_format(&mut *handle, &format, request.frame_rate, request.log_color) {
            warn!("Failed to apply {}: {}", format, e);
            if let Some(previous) = &previous {
                if let Err(restore) = apply_format(handle, previous, previous_rate, previous_log) {
                    error!("Failed to restore previous format {}: {}", previous, restore);
                }
            }
            return Err(match e {
                CameraError::ConfigurationFailed { .. } => e,
                other => CameraError::configuration(other.to_string()),
            });
        }

        config.format = Some(format.clone());
        config.frame_rate = request.frame_rate;
        config.resolution = (request.width, request.height);
        config.log_color = request.log_color;
        self.orientation.apply_to(&mut config.connections);
        config.commit();

        info!("Active format {} @ {}fps", format, request.frame_rate);
        self.publish_format(&core);
        Ok(format)
    }

    /// Current resolution/rate/log request, for building modified requests
    pub async fn current_request(&self) -> FormatRequest {
        let core = self.core.lock().await;
        FormatRequest {
            width: core.resolution.0,
            height: core.resolution.1,
            frame_rate: core.frame_rate,
            log_color: core.log_color,
        }
    }

    /// Replace the input with another device, keeping resolution, frame
    /// rate, log mode and rotation. Zoom starts at 1.0 on the new input.
    /// When the new device cannot be opened or configured the old input
    /// stays active.
    pub async fn swap_input(&self, device_id: &str) -> Result<CaptureDevice, CameraError> {
        let mut core = self.core.lock().await;
        if core.device().map(|device| device.id.as_str()) == Some(device_id) {
            return core
                .device()
                .cloned()
                .ok_or_else(|| CameraError::setup_failed("session has no input device"));
        }

        let mut handle = self.backend.open(device_id)?;
        let device = handle.device().clone();
        let request = FormatRequest {
            width: core.resolution.0,
            height: core.resolution.1,
            frame_rate: core.frame_rate,
            log_color: core.log_color,
        };
        let format = FormatCatalog::new(&device).select(&request)?;
        apply_format(handle.as_mut(), &format, request.frame_rate, request.log_color)?;
        {
            let mut lock = DeviceLock::acquire(handle.as_mut())?;
            lock.set_zoom_factor(device.clamp_zoom(1.0))?;
        }

        let connections = connections_for(&device, core.audio);
        let was_running = core.stop_streaming();
        {
            let mut config = Reconfiguration::begin(&mut core);
            // Dropping the previous handle releases that device
            config.handle = Some(handle);
            config.connections = connections;
            config.format = Some(format.clone());
            self.orientation.apply_to(&mut config.connections);
            config.commit();
        }

        info!(
            "Switched input to {} ({}x lens), {}",
            device.id, device.nominal_zoom, format
        );
        self.events.emit(CameraEvent::LensChanged {
            device_id: device.id.clone(),
            nominal_zoom: device.nominal_zoom,
            zoom: device.clamp_zoom(1.0),
        });
        self.publish_format(&core);

        if was_running {
            if let Err(e) = self.restart(&mut core) {
                self.events.emit(CameraEvent::SessionRunning { running: false });
                return Err(e);
            }
        }
        Ok(device)
    }

    /// Set the digital zoom on the active input, clamped to its range.
    /// `ramp_rate` moves there smoothly instead of jumping.
    pub async fn set_zoom(&self, factor: f64, ramp_rate: Option<f64>) -> Result<f64, CameraError> {
        let mut core = self.core.lock().await;
        let Some(handle) = core.handle.as_deref_mut() else {
            return Err(CameraError::setup_failed("session has no input device"));
        };
        let clamped = handle.device().clamp_zoom(factor);
        if clamped != factor {
            debug!("Zoom {:.2} clamped to {:.2}", factor, clamped);
        }

        {
            let mut lock = DeviceLock::acquire(handle)?;
            match ramp_rate {
                Some(rate) => lock.ramp_zoom(clamped, rate)?,
                None => lock.set_zoom_factor(clamped)?,
            }
        }
        self.events.emit(CameraEvent::ZoomChanged { zoom: clamped });
        Ok(clamped)
    }

    pub async fn set_white_balance(&self, kelvin: f32) -> Result<(), CameraError> {
        let (min, max) = WHITE_BALANCE_RANGE;
        if !(min..=max).contains(&kelvin) {
            return Err(CameraError::WhiteBalance {
                details: format!("{}K is outside {}K..={}K", kelvin, min, max),
            });
        }

        let mut core = self.core.lock().await;
        let Some(handle) = core.handle.as_deref_mut() else {
            return Err(CameraError::setup_failed("session has no input device"));
        };
        let mut lock = DeviceLock::acquire(handle)?;
        lock.set_white_balance(kelvin).map_err(|e| match e {
            CameraError::WhiteBalance { .. } => e,
            other => CameraError::WhiteBalance {
                details: other.to_string(),
            },
        })
    }

    /// Torch level in 0..=1; 0 turns it off
    pub async fn set_torch(&self, level: f32) -> Result<(), CameraError> {
        let mut core = self.core.lock().await;
        let Some(handle) = core.handle.as_deref_mut() else {
            return Err(CameraError::setup_failed("session has no input device"));
        };
        if !handle.device().has_torch {
            return Err(CameraError::configuration(format!(
                "'{}' has no torch",
                handle.device().id
            )));
        }
        let mut lock = DeviceLock::acquire(handle)?;
        lock.set_torch(level.clamp(0.0, 1.0))
    }

    /// Record a new interface orientation and apply it when it changes the angle
    pub async fn report_orientation(&self, orientation: InterfaceOrientation) -> OrientationUpdate {
        let update = self.orientation.update(orientation);
        if let OrientationUpdate::Changed(_) = update {
            self.reapply_orientation().await;
        }
        update
    }

    /// Write the effective angle to every connection. Idempotent.
    pub async fn reapply_orientation(&self) -> Rotation {
        let mut core = self.core.lock().await;
        let before = video_rotation(&core.connections);
        let applied = self.orientation.apply_to(&mut core.connections);
        let after = video_rotation(&core.connections);
        debug!("Orientation applied to {} connections", applied);

        let angle = self.orientation.current_angle();
        if before != after {
            self.events
                .emit(CameraEvent::OrientationChanged { rotation: angle });
        }
        angle
    }

    /// Stop streaming and end the monitor task
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.stop().await;
    }

    fn restart(&self, core: &mut SessionCore) -> Result<bool, CameraError> {
        core.start_streaming(
            Arc::clone(&self.sink),
            self.frame_queue_depth,
            self.interruptions.clone(),
        )
    }

    /// Tear down after an external interruption and try one restart
    async fn recover_from_interruption(&self, reason: String) {
        self.events
            .emit(CameraEvent::SessionInterrupted { reason: reason.clone() });

        let mut core = self.core.lock().await;
        if !core.stop_streaming() {
            debug!("Interruption after the session stopped, ignoring");
            return;
        }
        self.events.emit(CameraEvent::SessionRunning { running: false });

        info!("Restarting capture session after interruption: {}", reason);
        match self.restart(&mut core) {
            Ok(_) => self.events.emit(CameraEvent::SessionRunning { running: true }),
            Err(e) => self.events.emit(CameraEvent::Error {
                error: CameraError::setup_failed(format!(
                    "restart after interruption failed: {}",
                    e
                )),
            }),
        }
    }

    fn publish_format(&self, core: &SessionCore) {
        if let Some(format) = &core.format {
            self.events.emit(CameraEvent::FormatChanged {
                width: format.width,
                height: format.height,
                frame_rate: core.frame_rate,
                log_color: core.log_color,
                iso_range: format.iso_range,
            });
        }
    }
}

impl Drop for CaptureSessionController {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.core.get_mut().stop_streaming();
    }
}

fn parameters(core: &SessionCore) -> Option<CaptureParameters> {
    let handle = core.handle.as_ref()?;
    Some(CaptureParameters {
        device: handle.device().clone(),
        format: core.format.clone()?,
        frame_rate: core.frame_rate,
        log_color: core.log_color,
        zoom: handle.zoom_factor(),
    })
}

fn video_rotation(connections: &[Connection]) -> Option<Rotation> {
    connections
        .iter()
        .find(|connection| connection.output == OutputKind::VideoData)
        .map(Connection::rotation)
}

/// Restart after interruptions and reapply orientation once a recording
/// returns to idle or events were missed.
fn spawn_monitor(
    controller: Weak<CaptureSessionController>,
    mut interruptions: mpsc::UnboundedReceiver<String>,
    mut bus: broadcast::Receiver<CameraEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                reason = interruptions.recv() => {
                    let Some(reason) = reason else { break };
                    let Some(controller) = controller.upgrade() else { break };
                    controller.recover_from_interruption(reason).await;
                }
                event = bus.recv() => match event {
                    Ok(CameraEvent::RecordingStateChanged { state: RecordingState::Idle }) => {
                        let Some(controller) = controller.upgrade() else { break };
                        controller.reapply_orientation().await;
                    }
                    Ok(_) => {}
                    // A skipped `Idle` would leave the rotation stale
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Session monitor lagged behind by {} events, reapplying orientation",
                            skipped
                        );
                        let Some(controller) = controller.upgrade() else { break };
                        controller.reapply_orientation().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Session monitor exiting");
    });
}
