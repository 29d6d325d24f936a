use std::time::{Duration, Instant};

/// Frame path statistics
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub frames_processed: u64,
    pub lut_frames: u64,
    pub fallbacks: u64,
    pub recorded: u64,
    pub audio_buffers: u64,
    window_start: Option<Instant>,
    window_frames: u64,
    last_fps: f64,
}

impl FrameStats {
    pub fn record_frame(&mut self, graded: bool) {
        self.frames_processed += 1;
        self.window_frames += 1;
        if graded {
            self.lut_frames += 1;
        }
        self.window_start.get_or_insert_with(Instant::now);
    }

    pub fn record_fallback(&mut self) {
        self.fallbacks += 1;
    }

    pub fn record_recorded(&mut self) {
        self.recorded += 1;
    }

    pub fn record_audio(&mut self) {
        self.audio_buffers += 1;
    }

    /// Close the measurement window once `interval` has elapsed.
    /// Returns the rate over the closed window.
    pub fn roll_window(&mut self, interval: Duration) -> Option<f64> {
        let started = self.window_start?;
        let elapsed = started.elapsed();
        if elapsed < interval {
            return None;
        }
        let seconds = elapsed.as_secs_f64();
        self.last_fps = if seconds > 0.0 {
            self.window_frames as f64 / seconds
        } else {
            0.0
        };
        self.window_frames = 0;
        self.window_start = Some(Instant::now());
        Some(self.last_fps)
    }

    /// Rate measured over the last closed window
    pub fn fps(&self) -> f64 {
        self.last_fps
    }

    pub fn fallback_rate(&self) -> f64 {
        if self.lut_frames == 0 {
            0.0
        } else {
            self.fallbacks as f64 / self.lut_frames as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
