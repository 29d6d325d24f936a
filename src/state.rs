//! Read-only snapshot of the capture core for presentation collaborators.
//!
//! A single task owns the snapshot and folds every bus event into it, so
//! observers never see a half-updated state.

use crate::device::FrameRate;
use crate::error::CameraError;
use crate::events::{CameraEvent, EventBus};
use crate::frame::Rotation;
use crate::recording::RecordingState;
use crate::thumbnail::Thumbnail;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LensState {
    pub device_id: String,
    pub nominal_zoom: f64,
    pub zoom: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub log_color: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedRecording {
    pub location: PathBuf,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameCounters {
    pub frames: u64,
    pub fps: f64,
    pub lut_frames: u64,
    pub fallbacks: u64,
}

/// Everything collaborators may observe
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CameraState {
    pub session_running: bool,
    pub recording: bool,
    pub recording_state: RecordingState,
    pub processing: bool,
    pub last_error: Option<CameraError>,
    pub thumbnail: Option<Thumbnail>,
    pub lens: Option<LensState>,
    pub iso_range: Option<(f32, f32)>,
    pub format: Option<ActiveFormat>,
    pub lut_active: bool,
    pub lut_title: Option<String>,
    pub rotation: Option<Rotation>,
    pub interrupted: Option<String>,
    pub last_recording: Option<SavedRecording>,
    pub frame_counters: FrameCounters,
}

impl CameraState {
    /// Fold one event into the snapshot
    pub fn apply(&mut self, event: &CameraEvent) {
        match event {
            CameraEvent::SessionRunning { running } => {
                self.session_running = *running;
                if *running {
                    self.interrupted = None;
                }
            }
            CameraEvent::SessionInterrupted { reason } => {
                self.interrupted = Some(reason.clone());
            }
            CameraEvent::RecordingStateChanged { state } => {
                self.recording_state = *state;
                self.recording = *state != RecordingState::Idle;
            }
            CameraEvent::LensChanged {
                device_id,
                nominal_zoom,
                zoom,
            } => {
                self.lens = Some(LensState {
                    device_id: device_id.clone(),
                    nominal_zoom: *nominal_zoom,
                    zoom: *zoom,
                });
            }
            CameraEvent::ZoomChanged { zoom } => {
                if let Some(lens) = self.lens.as_mut() {
                    lens.zoom = *zoom;
                }
            }
            CameraEvent::FormatChanged {
                width,
                height,
                frame_rate,
                log_color,
                iso_range,
            } => {
                self.format = Some(ActiveFormat {
                    width: *width,
                    height: *height,
                    frame_rate: *frame_rate,
                    log_color: *log_color,
                });
                self.iso_range = Some(*iso_range);
            }
            CameraEvent::LutChanged { active, title, .. } => {
                self.lut_active = *active;
                self.lut_title = title.clone();
            }
            CameraEvent::OrientationChanged { rotation } => {
                self.rotation = Some(*rotation);
            }
            CameraEvent::Processing { active } => {
                self.processing = *active;
            }
            CameraEvent::RecordingSaved { location, duration } => {
                self.last_recording = Some(SavedRecording {
                    location: location.clone(),
                    duration: *duration,
                });
            }
            CameraEvent::ThumbnailReady { thumbnail } => {
                self.thumbnail = Some(thumbnail.clone());
            }
            CameraEvent::Error { error } => {
                self.last_error = Some(error.clone());
            }
            CameraEvent::FrameStatistics {
                frames,
                fps,
                lut_frames,
                fallbacks,
            } => {
                self.frame_counters = FrameCounters {
                    frames: *frames,
                    fps: *fps,
                    lut_frames: *lut_frames,
                    fallbacks: *fallbacks,
                };
            }
        }
    }
}

/// Owner of the published [`CameraState`]
pub struct StateStore {
    receiver: watch::Receiver<CameraState>,
    task: JoinHandle<()>,
}

impl StateStore {
    /// Subscribe to `events` and start folding them into the snapshot
    pub fn spawn(events: &EventBus) -> Self {
        Self::spawn_with_resync(events, |_| {})
    }

    /// Like [`StateStore::spawn`], but when the store falls behind the bus
    /// `resync` rewrites the fields whose events may have been skipped from
    /// their authoritative sources.
    pub fn spawn_with_resync<F>(events: &EventBus, resync: F) -> Self
    where
        F: Fn(&mut CameraState) + Send + 'static,
    {
        let mut bus = events.subscribe();
        let (sender, receiver) = watch::channel(CameraState::default());

        let task = tokio::spawn(async move {
            loop {
                match bus.recv().await {
                    Ok(event) => {
                        sender.send_modify(|state| state.apply(&event));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("State store lagged behind by {} events, resyncing", skipped);
                        sender.send_modify(|state| resync(state));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event bus closed, state store exiting");
                        break;
                    }
                }
            }
        });

        Self { receiver, task }
    }

    pub fn snapshot(&self) -> CameraState {
        self.receiver.borrow().clone()
    }

    /// Receiver that is notified on every change
    pub fn subscribe(&self) -> watch::Receiver<CameraState> {
        self.receiver.clone()
    }

    /// Wait until `predicate` holds for the snapshot
    pub async fn wait_for<F>(&self, predicate: F) -> CameraState
    where
        F: Fn(&CameraState) -> bool,
    {
        let mut receiver = self.receiver.clone();
        loop {
            {
                let state = receiver.borrow_and_update();
                if predicate(&state) {
                    return state.clone();
                }
            }
            if receiver.changed().await.is_err() {
                return receiver.borrow().clone();
            }
        }
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_recording_flag_follows_state() {
        let mut state = CameraState::default();
        state.apply(&CameraEvent::RecordingStateChanged {
            state: RecordingState::Starting,
        });
        assert!(state.recording);
        state.apply(&CameraEvent::RecordingStateChanged {
            state: RecordingState::Idle,
        });
        assert!(!state.recording);
    }

    #[test]
    fn test_zoom_updates_current_lens() {
        let mut state = CameraState::default();
        state.apply(&CameraEvent::ZoomChanged { zoom: 2.0 });
        assert!(state.lens.is_none());

        state.apply(&CameraEvent::LensChanged {
            device_id: "back-tele".to_string(),
            nominal_zoom: 5.0,
            zoom: 1.0,
        });
        state.apply(&CameraEvent::ZoomChanged { zoom: 2.0 });
        let lens = state.lens.unwrap();
        assert_eq!(lens.device_id, "back-tele");
        assert_eq!(lens.zoom, 2.0);
    }

    #[test]
    fn test_running_clears_interruption() {
        let mut state = CameraState::default();
        state.apply(&CameraEvent::SessionInterrupted {
            reason: "media services reset".to_string(),
        });
        assert!(state.interrupted.is_some());
        state.apply(&CameraEvent::SessionRunning { running: true });
        assert!(state.interrupted.is_none());
        assert!(state.session_running);
    }

    #[tokio::test]
    async fn test_lagging_store_resyncs() {
        let bus = EventBus::new(2);
        let source = Arc::new(parking_lot::Mutex::new(RecordingState::Writing));
        let store = {
            let source = Arc::clone(&source);
            StateStore::spawn_with_resync(&bus, move |state| {
                let recording_state = *source.lock();
                state.recording_state = recording_state;
                state.recording = recording_state != RecordingState::Idle;
                state.rotation = Some(Rotation::Rotate180);
            })
        };

        bus.emit(CameraEvent::RecordingStateChanged {
            state: RecordingState::Writing,
        });
        tokio::time::timeout(Duration::from_secs(1), store.wait_for(|state| state.recording))
            .await
            .unwrap();

        // The store task cannot run between these, so `Idle` is overwritten
        *source.lock() = RecordingState::Idle;
        bus.emit(CameraEvent::RecordingStateChanged {
            state: RecordingState::Idle,
        });
        for frames in 1..=8 {
            bus.emit(CameraEvent::FrameStatistics {
                frames,
                fps: 30.0,
                lut_frames: 0,
                fallbacks: 0,
            });
        }

        let state = tokio::time::timeout(
            Duration::from_secs(1),
            store.wait_for(|state| state.frame_counters.frames == 8),
        )
        .await
        .unwrap();
        assert!(!state.recording);
        assert_eq!(state.recording_state, RecordingState::Idle);
        assert_eq!(state.rotation, Some(Rotation::Rotate180));
    }

    #[tokio::test]
    async fn test_store_publishes_events() {
        let bus = EventBus::new(16);
        let store = StateStore::spawn(&bus);

        bus.emit(CameraEvent::FormatChanged {
            width: 1920,
            height: 1080,
            frame_rate: FrameRate::Fps24,
            log_color: false,
            iso_range: (32.0, 3_200.0),
        });
        bus.emit(CameraEvent::Error {
            error: CameraError::saving("disk full"),
        });

        let state = tokio::time::timeout(
            Duration::from_secs(1),
            store.wait_for(|state| state.last_error.is_some()),
        )
        .await
        .unwrap();
        assert_eq!(state.iso_range, Some((32.0, 3_200.0)));
        assert_eq!(state.format.unwrap().frame_rate, FrameRate::Fps24);
        assert_eq!(state.last_error, Some(CameraError::saving("disk full")));
    }
}
