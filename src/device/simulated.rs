use super::{
    CaptureDevice, ColorSpace, DeviceBackend, DeviceHandle, DevicePosition, FormatDescriptor,
    FrameRate, FrameRateRange, SampleOutputs, SensorEvent,
};
use crate::error::CameraError;
use crate::frame::{AudioFrame, FrameData, PixelFormat};
use crossbeam::channel::TrySendError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u16 = 2;

/// Observable and injectable state shared by a simulated backend and its handles
#[derive(Debug, Default)]
pub struct SimulatedState {
    /// Devices that refuse to open
    pub unavailable: HashSet<String>,
    /// Make the next configuration lock attempt fail
    pub fail_next_lock: bool,
    /// Make white balance requests fail
    pub reject_white_balance: bool,
    pub lock_count: u32,
    pub unlock_count: u32,
    pub active_formats: HashMap<String, FormatDescriptor>,
    pub frame_rates: HashMap<String, FrameRate>,
    pub color_spaces: HashMap<String, ColorSpace>,
    pub zoom: HashMap<String, f64>,
    pub torch: HashMap<String, f32>,
    pub white_balance: HashMap<String, f32>,
    /// Device currently delivering frames
    pub streaming_device: Option<String>,
    pub stream_starts: u32,
    /// Delivered on the video queue by the next generated frame
    pub pending_interruption: Option<String>,
    /// Ordered record of configuration calls, e.g. "lock:wide"
    pub calls: Vec<String>,
}

/// Hardware-free camera backend with a synthetic test pattern.
///
/// Frames are paced in real time at the active frame rate. `frame_divisor`
/// shrinks generated buffers relative to the active format for cheap runs.
#[derive(Clone)]
pub struct SimulatedBackend {
    devices: Vec<CaptureDevice>,
    state: Arc<Mutex<SimulatedState>>,
    frame_divisor: u32,
}

impl SimulatedBackend {
    pub fn new(devices: Vec<CaptureDevice>) -> Self {
        Self {
            devices,
            state: Arc::new(Mutex::new(SimulatedState::default())),
            frame_divisor: 1,
        }
    }

    /// A four-camera phone layout: 0.5x ultra wide, 1x wide, 5x tele and a front camera.
    /// Only the wide and tele lenses offer log-capable 4K.
    pub fn multi_lens() -> Self {
        let hd = |codec: &str, spaces: Vec<ColorSpace>, hdr: bool, max_fps: f64| {
            format(1920, 1080, codec, spaces, hdr, vec![(1.0, max_fps)])
        };
        let uhd = |codec: &str, spaces: Vec<ColorSpace>, hdr: bool| {
            format(3840, 2160, codec, spaces, hdr, vec![(1.0, 30.0)])
        };
        let standard = || vec![ColorSpace::Standard, ColorSpace::WideGamut];
        let log = || vec![ColorSpace::Standard, ColorSpace::Log];

        let wide = CaptureDevice {
            id: "back-wide".to_string(),
            name: "Back Wide Camera".to_string(),
            position: DevicePosition::Back,
            nominal_zoom: 1.0,
            formats: vec![
                format(1280, 720, "420v", standard(), false, vec![(1.0, 60.0)]),
                hd("420v", standard(), false, 60.0),
                hd("x420", log(), true, 30.0),
                uhd("420v", standard(), false),
                uhd("x420", log(), true),
            ],
            zoom_range: (1.0, 15.0),
            has_torch: true,
        };
        let ultra_wide = CaptureDevice {
            id: "back-ultra-wide".to_string(),
            name: "Back Ultra Wide Camera".to_string(),
            position: DevicePosition::Back,
            nominal_zoom: 0.5,
            formats: vec![hd("420v", standard(), false, 60.0), uhd("420v", standard(), false)],
            zoom_range: (1.0, 8.0),
            has_torch: true,
        };
        let tele = CaptureDevice {
            id: "back-tele".to_string(),
            name: "Back Telephoto Camera".to_string(),
            position: DevicePosition::Back,
            nominal_zoom: 5.0,
            formats: vec![
                hd("420v", standard(), false, 60.0),
                uhd("420v", standard(), false),
                uhd("x420", log(), true),
            ],
            zoom_range: (1.0, 4.0),
            has_torch: true,
        };
        let front = CaptureDevice {
            id: "front".to_string(),
            name: "Front Camera".to_string(),
            position: DevicePosition::Front,
            nominal_zoom: 1.0,
            formats: vec![
                format(1280, 720, "420v", standard(), false, vec![(1.0, 60.0)]),
                hd("420v", standard(), false, 60.0),
            ],
            zoom_range: (1.0, 4.0),
            has_torch: false,
        };

        Self::new(vec![ultra_wide, wide, tele, front])
    }

    pub fn with_frame_divisor(mut self, divisor: u32) -> Self {
        self.frame_divisor = divisor.max(1);
        self
    }

    pub fn state(&self) -> Arc<Mutex<SimulatedState>> {
        Arc::clone(&self.state)
    }

    pub fn set_unavailable(&self, device_id: &str, unavailable: bool) {
        let mut state = self.state.lock();
        if unavailable {
            state.unavailable.insert(device_id.to_string());
        } else {
            state.unavailable.remove(device_id);
        }
    }

    pub fn fail_next_lock(&self) {
        self.state.lock().fail_next_lock = true;
    }

    /// Simulate an external media-service reset
    pub fn interrupt(&self, reason: &str) {
        self.state.lock().pending_interruption = Some(reason.to_string());
    }
}

fn format(
    width: u32,
    height: u32,
    codec: &str,
    color_spaces: Vec<ColorSpace>,
    hdr: bool,
    ranges: Vec<(f64, f64)>,
) -> FormatDescriptor {
    FormatDescriptor {
        width,
        height,
        codec_subtype: codec.to_string(),
        pixel_format: PixelFormat::Bgra32,
        color_spaces,
        hdr,
        frame_rate_ranges: ranges
            .into_iter()
            .map(|(min, max)| FrameRateRange::new(min, max))
            .collect(),
        iso_range: if hdr { (50.0, 2_500.0) } else { (32.0, 3_200.0) },
    }
}

impl DeviceBackend for SimulatedBackend {
    fn devices(&self) -> Vec<CaptureDevice> {
        self.devices.clone()
    }

    fn open(&self, device_id: &str) -> Result<Box<dyn DeviceHandle>, CameraError> {
        if self.state.lock().unavailable.contains(device_id) {
            return Err(CameraError::device_unavailable(format!(
                "device '{}' is in use or disconnected",
                device_id
            )));
        }

        let device = self
            .devices
            .iter()
            .find(|device| device.id == device_id)
            .cloned()
            .ok_or_else(|| {
                CameraError::device_unavailable(format!("no device with id '{}'", device_id))
            })?;

        debug!("Opened simulated device {}", device.id);
        self.state.lock().calls.push(format!("open:{}", device.id));

        Ok(Box::new(SimulatedHandle {
            device,
            state: Arc::clone(&self.state),
            locked: false,
            zoom: 1.0,
            frame_divisor: self.frame_divisor,
            stream: None,
            epoch: Instant::now(),
        }))
    }
}

struct StreamWorker {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

struct SimulatedHandle {
    device: CaptureDevice,
    state: Arc<Mutex<SimulatedState>>,
    locked: bool,
    zoom: f64,
    frame_divisor: u32,
    stream: Option<StreamWorker>,
    /// Timeline origin shared by every stream of this handle
    epoch: Instant,
}

impl SimulatedHandle {
    fn require_lock(&self, operation: &str) -> Result<(), CameraError> {
        if self.locked {
            Ok(())
        } else {
            Err(CameraError::configuration(format!(
                "{} on '{}' requires the configuration lock",
                operation, self.device.id
            )))
        }
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

impl DeviceHandle for SimulatedHandle {
    fn device(&self) -> &CaptureDevice {
        &self.device
    }

    fn lock_for_configuration(&mut self) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_lock) {
            return Err(CameraError::configuration(format!(
                "could not lock '{}' for configuration",
                self.device.id
            )));
        }
        state.lock_count += 1;
        state.calls.push(format!("lock:{}", self.device.id));
        self.locked = true;
        Ok(())
    }

    fn unlock_for_configuration(&mut self) {
        if !self.locked {
            return;
        }
        self.locked = false;
        let mut state = self.state.lock();
        state.unlock_count += 1;
        state.calls.push(format!("unlock:{}", self.device.id));
    }

    fn set_active_format(&mut self, format: &FormatDescriptor) -> Result<(), CameraError> {
        self.require_lock("set_active_format")?;
        if !self.device.formats.contains(format) {
            return Err(CameraError::configuration(format!(
                "format {} is not offered by '{}'",
                format, self.device.id
            )));
        }
        let mut state = self.state.lock();
        state
            .active_formats
            .insert(self.device.id.clone(), format.clone());
        state
            .calls
            .push(format!("format:{}:{}x{}", self.device.id, format.width, format.height));
        Ok(())
    }

    fn set_frame_duration(&mut self, rate: FrameRate) -> Result<(), CameraError> {
        self.require_lock("set_frame_duration")?;
        let mut state = self.state.lock();
        let supported = state
            .active_formats
            .get(&self.device.id)
            .map(|format| format.supports_fps(rate.as_f64()))
            .unwrap_or(false);
        if !supported {
            return Err(CameraError::configuration(format!(
                "{} fps is outside the active format of '{}'",
                rate, self.device.id
            )));
        }
        state.frame_rates.insert(self.device.id.clone(), rate);
        state.calls.push(format!("fps:{}:{}", self.device.id, rate));
        Ok(())
    }

    fn set_color_space(&mut self, space: ColorSpace) -> Result<(), CameraError> {
        self.require_lock("set_color_space")?;
        let mut state = self.state.lock();
        let supported = state
            .active_formats
            .get(&self.device.id)
            .map(|format| format.supports_color_space(space))
            .unwrap_or(false);
        if !supported {
            return Err(CameraError::configuration(format!(
                "color space {:?} is not offered by the active format of '{}'",
                space, self.device.id
            )));
        }
        state.color_spaces.insert(self.device.id.clone(), space);
        Ok(())
    }

    fn zoom_factor(&self) -> f64 {
        self.zoom
    }

    fn set_zoom_factor(&mut self, factor: f64) -> Result<(), CameraError> {
        self.require_lock("set_zoom_factor")?;
        let (min, max) = self.device.zoom_range;
        if !(min..=max).contains(&factor) {
            return Err(CameraError::configuration(format!(
                "zoom {:.2} outside {:.2}..={:.2}",
                factor, min, max
            )));
        }
        self.zoom = factor;
        self.state.lock().zoom.insert(self.device.id.clone(), factor);
        self.record(format!("zoom:{}:{:.2}", self.device.id, factor));
        Ok(())
    }

    fn ramp_zoom(&mut self, factor: f64, rate: f64) -> Result<(), CameraError> {
        trace!(
            "Ramping zoom on {} from {:.2} to {:.2} at rate {:.1}",
            self.device.id,
            self.zoom,
            factor,
            rate
        );
        self.set_zoom_factor(factor)
    }

    fn set_white_balance(&mut self, kelvin: f32) -> Result<(), CameraError> {
        self.require_lock("set_white_balance")?;
        let mut state = self.state.lock();
        if state.reject_white_balance {
            return Err(CameraError::WhiteBalance {
                details: format!("'{}' rejected white balance gains", self.device.id),
            });
        }
        state.white_balance.insert(self.device.id.clone(), kelvin);
        Ok(())
    }

    fn set_torch(&mut self, level: f32) -> Result<(), CameraError> {
        self.require_lock("set_torch")?;
        if !self.device.has_torch {
            return Err(CameraError::configuration(format!(
                "'{}' has no torch",
                self.device.id
            )));
        }
        self.state
            .lock()
            .torch
            .insert(self.device.id.clone(), level.clamp(0.0, 1.0));
        Ok(())
    }

    fn start_streaming(&mut self, outputs: SampleOutputs) -> Result<(), CameraError> {
        if self.stream.is_some() {
            return Ok(());
        }

        {
            let mut state = self.state.lock();
            if !state.active_formats.contains_key(&self.device.id) {
                return Err(CameraError::setup_failed(format!(
                    "'{}' has no active format",
                    self.device.id
                )));
            }
            state.streaming_device = Some(self.device.id.clone());
            state.stream_starts += 1;
        }

        let running = Arc::new(AtomicBool::new(true));
        let generator = PatternGenerator {
            device_id: self.device.id.clone(),
            state: Arc::clone(&self.state),
            running: Arc::clone(&running),
            frame_divisor: self.frame_divisor,
            epoch: self.epoch,
            outputs,
        };

        let thread = std::thread::Builder::new()
            .name(format!("sim-{}", self.device.id))
            .spawn(move || generator.run())
            .map_err(|e| CameraError::setup_failed(format!("failed to spawn sensor thread: {}", e)))?;

        info!("Simulated device {} streaming", self.device.id);
        self.stream = Some(StreamWorker {
            running,
            thread: Some(thread),
        });
        Ok(())
    }

    fn stop_streaming(&mut self) {
        let Some(mut worker) = self.stream.take() else {
            return;
        };
        worker.running.store(false, Ordering::SeqCst);
        if let Some(thread) = worker.thread.take() {
            if thread.join().is_err() {
                warn!("Sensor thread for {} panicked", self.device.id);
            }
        }
        let mut state = self.state.lock();
        if state.streaming_device.as_deref() == Some(self.device.id.as_str()) {
            state.streaming_device = None;
        }
        debug!("Simulated device {} stopped streaming", self.device.id);
    }
}

impl Drop for SimulatedHandle {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

struct PatternGenerator {
    device_id: String,
    state: Arc<Mutex<SimulatedState>>,
    running: Arc<AtomicBool>,
    frame_divisor: u32,
    epoch: Instant,
    outputs: SampleOutputs,
}

impl PatternGenerator {
    fn run(self) {
        // A restarted stream continues the handle's timeline
        let started = self.epoch;
        let mut frame_id: u64 = 0;
        let mut segment_index: u64 = 0;
        let mut segment_base = started.elapsed();
        let mut current_rate: Option<FrameRate> = None;
        let mut audio_cursor =
            (segment_base.as_nanos() * AUDIO_SAMPLE_RATE as u128 / 1_000_000_000) as u64;

        while self.running.load(Ordering::SeqCst) {
            let (format, rate, interruption) = {
                let mut state = self.state.lock();
                (
                    state.active_formats.get(&self.device_id).cloned(),
                    state
                        .frame_rates
                        .get(&self.device_id)
                        .copied()
                        .unwrap_or(FrameRate::Fps30),
                    state.pending_interruption.take(),
                )
            };

            if let Some(reason) = interruption {
                let _ = self.outputs.video.send(SensorEvent::Interrupted { reason });
                break;
            }

            let Some(format) = format else {
                std::thread::sleep(Duration::from_millis(10));
                continue;
            };

            if current_rate != Some(rate) {
                if let Some(previous) = current_rate {
                    segment_base += previous.pts_of(segment_index);
                }
                segment_index = 0;
                current_rate = Some(rate);
            }

            let pts = segment_base + rate.pts_of(segment_index);
            let next_pts = segment_base + rate.pts_of(segment_index + 1);
            if let Some(wait) = pts.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }

            let width = (format.width / self.frame_divisor).max(2);
            let height = (format.height / self.frame_divisor).max(2);
            let frame = FrameData::new(
                frame_id,
                pts,
                next_pts - pts,
                render_pattern(frame_id, width, height, format.pixel_format),
                width,
                height,
                format.pixel_format,
            );

            match self.outputs.video.try_send(SensorEvent::Frame(frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!("Delivery queue full, discarding late frame {}", frame_id);
                }
                Err(TrySendError::Disconnected(_)) => break,
            }

            if let Some(audio) = &self.outputs.audio {
                let end_sample =
                    (next_pts.as_nanos() * AUDIO_SAMPLE_RATE as u128 / 1_000_000_000) as u64;
                let count = end_sample.saturating_sub(audio_cursor) as usize;
                let audio_pts = Duration::from_nanos(
                    (audio_cursor as u128 * 1_000_000_000 / AUDIO_SAMPLE_RATE as u128) as u64,
                );
                let samples = render_tone(audio_cursor, count);
                audio_cursor = end_sample;
                let frame = AudioFrame::new(audio_pts, samples, AUDIO_SAMPLE_RATE, AUDIO_CHANNELS);
                if let Err(TrySendError::Full(_)) = audio.try_send(frame) {
                    trace!("Audio queue full, discarding buffer at {:?}", audio_pts);
                }
            }

            frame_id += 1;
            segment_index += 1;
        }
    }
}

/// Diagonal gradient that scrolls one pixel per frame
fn render_pattern(frame_id: u64, width: u32, height: u32, format: PixelFormat) -> Vec<u8> {
    let size = format.frame_size(width, height);
    let Some(layout) = format.rgb_layout() else {
        return vec![128u8; size];
    };

    let mut data = vec![255u8; size];
    let offset = (frame_id % width.max(1) as u64) as u32;
    for y in 0..height {
        for x in 0..width {
            let base = (y * width + x) as usize * layout.stride;
            data[base + layout.r] = ((x + offset) % width * 255 / width) as u8;
            data[base + layout.g] = (y * 255 / height.max(1)) as u8;
            data[base + layout.b] = ((x + y + offset) % 256) as u8;
        }
    }
    data
}

/// 440 Hz stereo sine starting at an absolute sample position
fn render_tone(start_sample: u64, frames: usize) -> Vec<i16> {
    let mut samples = Vec::with_capacity(frames * AUDIO_CHANNELS as usize);
    for n in 0..frames as u64 {
        let t = (start_sample + n) as f64 / AUDIO_SAMPLE_RATE as f64;
        let value = ((t * 440.0 * std::f64::consts::TAU).sin() * 8_000.0) as i16;
        for _ in 0..AUDIO_CHANNELS {
            samples.push(value);
        }
    }
    samples
}
