use crate::device::FrameRate;
use crate::error::{CameraError, EventBusError};
use crate::frame::Rotation;
use crate::recording::RecordingState;
use crate::thumbnail::Thumbnail;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Events published by the capture core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CameraEvent {
    /// The capture session started or stopped delivering frames
    SessionRunning { running: bool },
    /// The capture pipeline was torn down externally
    SessionInterrupted { reason: String },
    /// The recording state machine moved to a new state
    RecordingStateChanged { state: RecordingState },
    /// A different physical lens became active
    LensChanged {
        device_id: String,
        nominal_zoom: f64,
        zoom: f64,
    },
    /// Zoom factor on the active lens changed
    ZoomChanged { zoom: f64 },
    /// A new sensor format is active
    FormatChanged {
        width: u32,
        height: u32,
        frame_rate: FrameRate,
        log_color: bool,
        iso_range: (f32, f32),
    },
    /// The selected LUT was replaced or cleared
    LutChanged {
        active: bool,
        title: Option<String>,
        size: Option<usize>,
    },
    /// The effective rotation angle changed
    OrientationChanged { rotation: Rotation },
    /// Post-recording work (finalize, save, thumbnail) started or finished
    Processing { active: bool },
    /// A recording was saved to the media library
    RecordingSaved { location: PathBuf, duration: Duration },
    /// Thumbnail of the most recent recording
    ThumbnailReady { thumbnail: Thumbnail },
    /// An operation failed
    Error { error: CameraError },
    /// Periodic frame path statistics
    FrameStatistics {
        frames: u64,
        fps: f64,
        lut_frames: u64,
        fallbacks: u64,
    },
}

impl CameraEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            CameraEvent::SessionRunning { running } => {
                format!("Capture session {}", if *running { "running" } else { "stopped" })
            }
            CameraEvent::SessionInterrupted { reason } => {
                format!("Capture session interrupted: {}", reason)
            }
            CameraEvent::RecordingStateChanged { state } => {
                format!("Recording state: {:?}", state)
            }
            CameraEvent::LensChanged {
                device_id,
                nominal_zoom,
                ..
            } => format!("Lens changed to {} ({}x)", device_id, nominal_zoom),
            CameraEvent::ZoomChanged { zoom } => format!("Zoom {:.2}x", zoom),
            CameraEvent::FormatChanged {
                width,
                height,
                frame_rate,
                log_color,
                ..
            } => format!(
                "Format {}x{} @ {}fps{}",
                width,
                height,
                frame_rate,
                if *log_color { " log" } else { "" }
            ),
            CameraEvent::LutChanged { active, title, .. } => match (active, title) {
                (false, _) => "LUT cleared".to_string(),
                (true, Some(title)) => format!("LUT '{}' selected", title),
                (true, None) => "LUT selected".to_string(),
            },
            CameraEvent::OrientationChanged { rotation } => {
                format!("Rotation {}°", rotation.degrees())
            }
            CameraEvent::Processing { active } => {
                format!("Processing {}", if *active { "started" } else { "finished" })
            }
            CameraEvent::RecordingSaved { location, duration } => format!(
                "Recording saved to {} ({:.1}s)",
                location.display(),
                duration.as_secs_f64()
            ),
            CameraEvent::ThumbnailReady { thumbnail } => {
                format!("Thumbnail ready ({}x{})", thumbnail.width, thumbnail.height)
            }
            CameraEvent::Error { error } => format!("Error: {}", error),
            CameraEvent::FrameStatistics { frames, fps, .. } => {
                format!("{} frames at {:.1} fps", frames, fps)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            CameraEvent::SessionRunning { .. } => "session_running",
            CameraEvent::SessionInterrupted { .. } => "session_interrupted",
            CameraEvent::RecordingStateChanged { .. } => "recording_state_changed",
            CameraEvent::LensChanged { .. } => "lens_changed",
            CameraEvent::ZoomChanged { .. } => "zoom_changed",
            CameraEvent::FormatChanged { .. } => "format_changed",
            CameraEvent::LutChanged { .. } => "lut_changed",
            CameraEvent::OrientationChanged { .. } => "orientation_changed",
            CameraEvent::Processing { .. } => "processing",
            CameraEvent::RecordingSaved { .. } => "recording_saved",
            CameraEvent::ThumbnailReady { .. } => "thumbnail_ready",
            CameraEvent::Error { .. } => "error",
            CameraEvent::FrameStatistics { .. } => "frame_statistics",
        }
    }
}

/// Broadcast bus connecting the capture core to its collaborators.
///
/// Publishing never blocks, so it is safe from the frame delivery threads.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CameraEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        Self {
            debug_logging: true,
            ..Self::new(capacity)
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: CameraEvent) -> Result<usize, EventBusError> {
        match &event {
            CameraEvent::Error { error } => {
                error!("{}", error);
            }
            CameraEvent::SessionInterrupted { reason } => {
                warn!("Capture session interrupted: {}", reason);
            }
            CameraEvent::RecordingSaved { .. } | CameraEvent::LensChanged { .. } => {
                info!("{}", event.description());
            }
            CameraEvent::FrameStatistics { .. } => {
                trace!("{}", event.description());
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish, ignoring the absence of subscribers
    pub fn emit(&self, event: CameraEvent) {
        if let Err(e) = self.publish(event) {
            trace!("Event dropped: {}", e);
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    /// Only `Error` events
    Errors,
    Custom(fn(&CameraEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &CameraEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Errors => matches!(event, CameraEvent::Error { .. }),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<CameraEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<CameraEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<CameraEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        trace!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, skipped);
                    return Err(EventBusError::Lagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<CameraEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, skipped);
                    return Err(EventBusError::Lagged { skipped });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus
            .publish(CameraEvent::ZoomChanged { zoom: 2.0 })
            .unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            CameraEvent::ZoomChanged { zoom } => assert_eq!(zoom, 2.0),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let event_bus = EventBus::new(4);
        assert!(event_bus
            .publish(CameraEvent::SessionRunning { running: true })
            .is_err());
        // emit swallows the error
        event_bus.emit(CameraEvent::SessionRunning { running: true });
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut errors = event_bus.subscribe_filtered(EventFilter::Errors, "errors");

        event_bus.emit(CameraEvent::ZoomChanged { zoom: 1.5 });
        event_bus.emit(CameraEvent::Error {
            error: CameraError::recording("writer stalled"),
        });

        let event = timeout(Duration::from_millis(100), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "error");
        assert!(errors.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_skipped() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe_filtered(EventFilter::All, "slow");
        for zoom in 0..5 {
            event_bus.emit(CameraEvent::ZoomChanged { zoom: zoom as f64 });
        }
        assert!(matches!(
            receiver.recv().await,
            Err(EventBusError::Lagged { skipped: 3 })
        ));
    }

    #[test]
    fn test_event_filter_types() {
        let filter = EventFilter::EventTypes(vec!["lut_changed", "format_changed"]);
        assert!(filter.matches(&CameraEvent::LutChanged {
            active: false,
            title: None,
            size: None
        }));
        assert!(!filter.matches(&CameraEvent::Processing { active: true }));
    }
}
