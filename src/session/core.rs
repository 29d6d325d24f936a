use crate::device::{
    CaptureDevice, ColorSpace, Connection, DeviceHandle, DeviceLock, DevicePosition,
    FormatDescriptor, FrameRate, OutputKind, SampleOutputs, SensorEvent,
};
use crate::error::CameraError;
use crate::frame::Rotation;
use crate::pipeline::FrameSink;
use crossbeam::channel::bounded;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Audio buffers queued per video frame slot
const AUDIO_QUEUE_FACTOR: usize = 4;

/// Threads draining the sensor queues into the frame sink
pub(crate) struct Delivery {
    video: Option<JoinHandle<()>>,
    audio: Option<JoinHandle<()>>,
}

impl Delivery {
    /// Create the per-source queues and one delivery thread for each.
    /// Interruptions seen on the video queue are forwarded to `interruptions`.
    pub(crate) fn spawn(
        sink: Arc<dyn FrameSink>,
        depth: usize,
        audio: bool,
        interruptions: mpsc::UnboundedSender<String>,
    ) -> Result<(SampleOutputs, Self), CameraError> {
        let (video_tx, video_rx) = bounded::<SensorEvent>(depth.max(1));
        let video_sink = Arc::clone(&sink);
        let video = std::thread::Builder::new()
            .name("video-delivery".to_string())
            .spawn(move || {
                for event in video_rx {
                    match event {
                        SensorEvent::Frame(frame) => video_sink.on_video_frame(frame),
                        SensorEvent::Interrupted { reason } => {
                            let _ = interruptions.send(reason);
                            break;
                        }
                    }
                }
                trace!("Video delivery thread exiting");
            })
            .map_err(|e| {
                CameraError::setup_failed(format!("failed to spawn video delivery: {}", e))
            })?;

        let (audio_tx, audio_thread) = if audio {
            let (tx, rx) = bounded(depth.max(1) * AUDIO_QUEUE_FACTOR);
            let thread = std::thread::Builder::new()
                .name("audio-delivery".to_string())
                .spawn(move || {
                    for frame in rx {
                        sink.on_audio_frame(frame);
                    }
                    trace!("Audio delivery thread exiting");
                })
                .map_err(|e| {
                    CameraError::setup_failed(format!("failed to spawn audio delivery: {}", e))
                })?;
            (Some(tx), Some(thread))
        } else {
            (None, None)
        };

        Ok((
            SampleOutputs {
                video: video_tx,
                audio: audio_tx,
            },
            Self {
                video: Some(video),
                audio: audio_thread,
            },
        ))
    }

    /// Wait for both threads; they exit once the device drops its senders
    pub(crate) fn join(mut self) {
        for thread in [self.video.take(), self.audio.take()].into_iter().flatten() {
            if thread.join().is_err() {
                warn!("Frame delivery thread panicked");
            }
        }
    }
}

/// Connections for an input: preview and video data take any right angle,
/// audio carries no rotation.
pub(crate) fn connections_for(device: &CaptureDevice, audio: bool) -> Vec<Connection> {
    let mirrored = device.position == DevicePosition::Front;
    let mut connections = vec![
        Connection::new(OutputKind::Preview, Rotation::ALL.to_vec(), mirrored),
        Connection::new(OutputKind::VideoData, Rotation::ALL.to_vec(), mirrored),
    ];
    if audio {
        connections.push(Connection::new(OutputKind::AudioData, Vec::new(), false));
    }
    connections
}

/// Apply format, frame duration and color space under one configuration lock
pub(crate) fn apply_format(
    handle: &mut (dyn DeviceHandle + 'static),
    format: &FormatDescriptor,
    frame_rate: FrameRate,
    log_color: bool,
) -> Result<(), CameraError> {
    let mut device = DeviceLock::acquire(handle)?;
    device.set_active_format(format)?;
    device.set_frame_duration(frame_rate)?;
    device.set_color_space(if log_color {
        ColorSpace::Log
    } else {
        ColorSpace::Standard
    })?;
    Ok(())
}

/// Device and connection state owned by the configuration queue
pub(crate) struct SessionCore {
    pub handle: Option<Box<dyn DeviceHandle>>,
    pub connections: Vec<Connection>,
    pub format: Option<FormatDescriptor>,
    pub frame_rate: FrameRate,
    pub resolution: (u32, u32),
    pub log_color: bool,
    pub audio: bool,
    pub running: bool,
    pub configuring: bool,
    pub begins: u64,
    pub commits: u64,
    delivery: Option<Delivery>,
}

impl SessionCore {
    pub fn new(resolution: (u32, u32), frame_rate: FrameRate, log_color: bool, audio: bool) -> Self {
        Self {
            handle: None,
            connections: Vec::new(),
            format: None,
            frame_rate,
            resolution,
            log_color,
            audio,
            running: false,
            configuring: false,
            begins: 0,
            commits: 0,
            delivery: None,
        }
    }

    pub fn device(&self) -> Option<&CaptureDevice> {
        self.handle.as_ref().map(|handle| handle.device())
    }

    /// Start delivering frames. Fails fast inside a reconfiguration.
    pub fn start_streaming(
        &mut self,
        sink: Arc<dyn FrameSink>,
        depth: usize,
        interruptions: mpsc::UnboundedSender<String>,
    ) -> Result<bool, CameraError> {
        if self.configuring {
            return Err(CameraError::setup_failed(
                "cannot start the session while a reconfiguration is open",
            ));
        }
        if self.running {
            return Ok(false);
        }
        let audio = self.audio;
        let Some(handle) = self.handle.as_mut() else {
            return Err(CameraError::setup_failed("session has no input device"));
        };

        let (outputs, delivery) = Delivery::spawn(sink, depth, audio, interruptions)?;
        if let Err(e) = handle.start_streaming(outputs) {
            // The device dropped the senders, so the threads are already exiting
            delivery.join();
            return Err(e);
        }

        info!("Capture session running on {}", handle.device().id);
        self.delivery = Some(delivery);
        self.running = true;
        Ok(true)
    }

    /// Stop delivering frames; a no-op when already stopped
    pub fn stop_streaming(&mut self) -> bool {
        let was_running = self.running;
        if let Some(handle) = self.handle.as_mut() {
            handle.stop_streaming();
        }
        if let Some(delivery) = self.delivery.take() {
            delivery.join();
        }
        self.running = false;
        if was_running {
            debug!("Capture session stopped");
        }
        was_running
    }
}
