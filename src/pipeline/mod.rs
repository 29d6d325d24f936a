//! Per-frame processing between the sensor queues and the consumers.
//!
//! Runs on the delivery threads: nothing here blocks on I/O or returns an
//! error. A frame that cannot be graded is passed on ungraded.

mod stats;
#[cfg(test)]
mod tests;

pub use stats::FrameStats;

use crate::events::{CameraEvent, EventBus};
use crate::frame::{AudioFrame, FrameData};
use crate::lut::{LutSlot, LutTransform};
use crate::recording::{AppendOutcome, RecordingSession};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Receives frames from the capture session's delivery threads.
///
/// Calls for one source arrive on one thread, in capture order.
pub trait FrameSink: Send + Sync {
    fn on_video_frame(&self, frame: FrameData);

    fn on_audio_frame(&self, frame: AudioFrame);
}

/// Live preview consumer, typically a presentation layer
pub trait PreviewSink: Send + Sync {
    fn present(&self, frame: &FrameData);
}

/// A frame after the grading step
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub frame: FrameData,
    /// Whether the LUT was applied
    pub graded: bool,
}

/// Applies the active LUT and fans frames out to preview and recording
pub struct FrameProcessingPipeline {
    lut: Arc<LutSlot>,
    recording: Arc<RecordingSession>,
    preview: RwLock<Option<Arc<dyn PreviewSink>>>,
    transform: Mutex<Option<LutTransform>>,
    stats: Mutex<FrameStats>,
    events: EventBus,
    stats_interval: Duration,
}

impl FrameProcessingPipeline {
    pub fn new(
        lut: Arc<LutSlot>,
        recording: Arc<RecordingSession>,
        events: EventBus,
        stats_interval: Duration,
    ) -> Self {
        Self {
            lut,
            recording,
            preview: RwLock::new(None),
            transform: Mutex::new(None),
            stats: Mutex::new(FrameStats::default()),
            events,
            stats_interval,
        }
    }

    pub fn set_preview(&self, preview: Option<Arc<dyn PreviewSink>>) {
        *self.preview.write() = preview;
    }

    pub fn stats(&self) -> FrameStats {
        self.stats.lock().clone()
    }

    /// Grade one frame with the LUT in effect right now
    pub fn process(&self, frame: FrameData) -> ProcessedFrame {
        let Some(cube) = self.lut.current() else {
            return ProcessedFrame {
                frame,
                graded: false,
            };
        };

        let rendered = {
            let mut cached = self.transform.lock();
            if !cached.as_ref().is_some_and(|transform| transform.is_for(&cube)) {
                debug!("Building LUT transform for {}³ cube", cube.size());
                *cached = Some(LutTransform::new(cube));
            }
            cached.as_ref().map(|transform| transform.render(&frame))
        };

        match rendered {
            Some(Ok(graded)) => ProcessedFrame {
                frame: graded,
                graded: true,
            },
            None => ProcessedFrame {
                frame,
                graded: false,
            },
            Some(Err(e)) => {
                trace!("LUT render failed for frame {}: {}", frame.id, e);
                self.stats.lock().record_fallback();
                ProcessedFrame {
                    frame,
                    graded: false,
                }
            }
        }
    }

    fn publish_statistics(&self) {
        let snapshot = {
            let mut stats = self.stats.lock();
            stats
                .roll_window(self.stats_interval)
                .map(|fps| (stats.frames_processed, fps, stats.lut_frames, stats.fallbacks))
        };
        if let Some((frames, fps, lut_frames, fallbacks)) = snapshot {
            self.events.emit(CameraEvent::FrameStatistics {
                frames,
                fps,
                lut_frames,
                fallbacks,
            });
        }
    }
}

impl FrameSink for FrameProcessingPipeline {
    fn on_video_frame(&self, frame: FrameData) {
        let processed = self.process(frame);

        if let Some(preview) = self.preview.read().as_ref() {
            preview.present(&processed.frame);
        }

        let outcome = self.recording.append_video(&processed.frame);
        {
            let mut stats = self.stats.lock();
            stats.record_frame(processed.graded);
            if outcome == AppendOutcome::Appended {
                stats.record_recorded();
            }
        }
        if outcome == AppendOutcome::Failed {
            warn!("Recording ended by a writer failure at frame {}", processed.frame.id);
        }

        self.publish_statistics();
    }

    fn on_audio_frame(&self, frame: AudioFrame) {
        if self.recording.append_audio(&frame) == AppendOutcome::Appended {
            self.stats.lock().record_audio();
        }
    }
}
