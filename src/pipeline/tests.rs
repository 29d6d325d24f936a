use super::*;
use crate::device::{ColorSpace, FormatDescriptor, FrameRate, FrameRateRange};
use crate::frame::PixelFormat;
use crate::library::DirectoryLibrary;
use crate::lut::{parse_cube, ColorCube};
use crate::orientation::{InterfaceOrientation, OrientationCoordinator, SensorMount};
use crate::recording::{MockWriterFactory, RecordingRequest, RecordingState, VideoCodec};
use tempfile::TempDir;

struct CollectingPreview {
    frames: Mutex<Vec<FrameData>>,
}

impl PreviewSink for CollectingPreview {
    fn present(&self, frame: &FrameData) {
        self.frames.lock().push(frame.clone());
    }
}

struct Fixture {
    pipeline: FrameProcessingPipeline,
    lut: Arc<LutSlot>,
    recording: Arc<RecordingSession>,
    factory: MockWriterFactory,
    events: EventBus,
    _dirs: (TempDir, TempDir),
}

fn fixture(stats_interval: Duration) -> Fixture {
    let scratch = TempDir::new().unwrap();
    let library = TempDir::new().unwrap();
    let factory = MockWriterFactory::new();
    let events = EventBus::new(128);
    let recording = Arc::new(RecordingSession::new(
        Arc::new(factory.clone()),
        Arc::new(DirectoryLibrary::new(library.path(), "CINE", "UTC", false)),
        Arc::new(OrientationCoordinator::new(
            SensorMount::LandscapeRightNative,
            InterfaceOrientation::LandscapeRight,
        )),
        events.clone(),
        scratch.path(),
    ));
    let lut = Arc::new(LutSlot::new());
    let pipeline = FrameProcessingPipeline::new(
        Arc::clone(&lut),
        Arc::clone(&recording),
        events.clone(),
        stats_interval,
    );
    Fixture {
        pipeline,
        lut,
        recording,
        factory,
        events,
        _dirs: (scratch, library),
    }
}

fn rgb_frame(id: u64) -> FrameData {
    let data: Vec<u8> = (0..8 * 4 * 3).map(|i| (i * 5 % 256) as u8).collect();
    FrameData::new(
        id,
        FrameRate::Fps24.pts_of(id),
        FrameRate::Fps24.frame_duration(),
        data,
        8,
        4,
        PixelFormat::Rgb24,
    )
}

fn cube_from(map: impl Fn(f32, f32, f32) -> [f32; 3]) -> Arc<ColorCube> {
    let mut text = String::from("LUT_3D_SIZE 2\n");
    for b in 0..2 {
        for g in 0..2 {
            for r in 0..2 {
                let [or, og, ob] = map(r as f32, g as f32, b as f32);
                text.push_str(&format!("{} {} {}\n", or, og, ob));
            }
        }
    }
    Arc::new(parse_cube(&text).unwrap())
}

fn invert() -> Arc<ColorCube> {
    cube_from(|r, g, b| [1.0 - r, 1.0 - g, 1.0 - b])
}

#[test]
fn test_passthrough_without_lut() {
    let f = fixture(Duration::from_secs(60));
    let frame = rgb_frame(0);
    let processed = f.pipeline.process(frame.clone());

    assert!(!processed.graded);
    assert!(Arc::ptr_eq(&processed.frame.data, &frame.data));
}

#[test]
fn test_lut_preserves_geometry_and_timing() {
    let f = fixture(Duration::from_secs(60));
    f.lut.replace(Some(invert()));

    for id in 0..5 {
        let frame = rgb_frame(id);
        let processed = f.pipeline.process(frame.clone());
        assert!(processed.graded);
        assert_eq!(processed.frame.width, frame.width);
        assert_eq!(processed.frame.height, frame.height);
        assert_eq!(processed.frame.format, frame.format);
        assert_eq!(processed.frame.pts, frame.pts);
        assert_eq!(processed.frame.duration, frame.duration);
        assert_eq!(processed.frame.data[0], 255 - frame.data[0]);
    }
}

#[test]
fn test_swapped_lut_takes_effect_on_next_frame() {
    let f = fixture(Duration::from_secs(60));
    let frame = rgb_frame(0);

    f.lut.replace(Some(invert()));
    let first = f.pipeline.process(frame.clone());
    f.lut.replace(Some(cube_from(|r, g, b| [r, g, b])));
    let second = f.pipeline.process(frame.clone());
    f.lut.clear();
    let third = f.pipeline.process(frame.clone());

    assert_eq!(first.frame.data[3], 255 - frame.data[3]);
    assert_eq!(second.frame.data.as_slice(), frame.data.as_slice());
    assert!(!third.graded);
}

#[test]
fn test_render_failure_falls_back_to_original() {
    let f = fixture(Duration::from_secs(60));
    f.lut.replace(Some(invert()));

    let nv12 = FrameData::new(
        0,
        Duration::ZERO,
        FrameRate::Fps30.frame_duration(),
        vec![16u8; PixelFormat::Nv12.frame_size(8, 4)],
        8,
        4,
        PixelFormat::Nv12,
    );
    let processed = f.pipeline.process(nv12.clone());

    assert!(!processed.graded);
    assert!(Arc::ptr_eq(&processed.frame.data, &nv12.data));
    assert_eq!(f.pipeline.stats().fallbacks, 1);
}

#[test]
fn test_preview_receives_every_frame() {
    let f = fixture(Duration::from_secs(60));
    let preview = Arc::new(CollectingPreview {
        frames: Mutex::new(Vec::new()),
    });
    f.pipeline
        .set_preview(Some(Arc::clone(&preview) as Arc<dyn PreviewSink>));
    f.lut.replace(Some(invert()));

    for id in 0..3 {
        f.pipeline.on_video_frame(rgb_frame(id));
    }

    let frames = preview.frames.lock();
    assert_eq!(frames.iter().map(|frame| frame.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    let stats = f.pipeline.stats();
    assert_eq!(stats.frames_processed, 3);
    assert_eq!(stats.lut_frames, 3);
    assert_eq!(stats.recorded, 0);
}

#[tokio::test]
async fn test_graded_frames_reach_the_recording() {
    let f = fixture(Duration::from_secs(60));
    f.lut.replace(Some(invert()));

    let format = FormatDescriptor {
        width: 8,
        height: 4,
        codec_subtype: "420v".to_string(),
        pixel_format: PixelFormat::Rgb24,
        color_spaces: vec![ColorSpace::Standard],
        hdr: false,
        frame_rate_ranges: vec![FrameRateRange::new(1.0, 30.0)],
        iso_range: (32.0, 3_200.0),
    };
    f.recording
        .start(RecordingRequest {
            device_id: "back-wide".to_string(),
            format,
            frame_rate: FrameRate::Fps24,
            codec: VideoCodec::Hevc,
            log_color: false,
            lut: f.lut.current(),
            audio: true,
        })
        .await
        .unwrap();

    for id in 0..4 {
        f.pipeline.on_video_frame(rgb_frame(id));
    }
    f.pipeline.on_audio_frame(AudioFrame::new(
        Duration::from_millis(10),
        vec![0; 960],
        48_000,
        2,
    ));
    assert_eq!(f.recording.state(), RecordingState::Writing);
    f.recording.stop().await.unwrap();

    let log = f.factory.log();
    let log = log.lock();
    assert_eq!(log.video.len(), 4);
    let original = rgb_frame(2);
    assert_eq!(log.video[2].data[0], 255 - original.data[0]);
    assert_eq!(log.video[2].pts, original.pts);
    assert_eq!(log.audio.len(), 1);
    assert_eq!(f.pipeline.stats().recorded, 4);
    assert_eq!(f.pipeline.stats().audio_buffers, 1);
}

#[test]
fn test_statistics_published_each_window() {
    let f = fixture(Duration::ZERO);
    let mut events = f.events.subscribe();

    f.pipeline.on_video_frame(rgb_frame(0));
    f.pipeline.on_video_frame(rgb_frame(1));

    let mut published = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CameraEvent::FrameStatistics { frames, .. } = event {
            published.push(frames);
        }
    }
    assert_eq!(published, vec![1, 2]);
}
