use super::*;
use crate::device::SimulatedBackend;
use crate::library::DirectoryLibrary;
use crate::permissions::StaticPermissions;
use crate::recording::MockWriterFactory;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    context: CameraContext,
    writers: MockWriterFactory,
    dirs: TempDir,
}

fn test_config(dirs: &TempDir) -> CinecamConfig {
    let mut config = CinecamConfig::default();
    config.camera.frame_rate = FrameRate::Fps30;
    config.recording.scratch_dir = dirs.path().join("scratch");
    config.recording.library_dir = dirs.path().join("library");
    config.system.stats_interval_ms = 50;
    config
}

async fn open_with(
    config: CinecamConfig,
    dirs: TempDir,
    permissions: StaticPermissions,
) -> Result<Fixture, CameraError> {
    let writers = MockWriterFactory::new();
    let library = DirectoryLibrary::new(&config.recording.library_dir, "CINE", "UTC", true);
    let context = CameraContext::open(
        &config,
        ContextParts {
            backend: Arc::new(SimulatedBackend::multi_lens().with_frame_divisor(32)),
            writers: Arc::new(writers.clone()),
            library: Arc::new(library),
            permissions: Arc::new(permissions),
        },
    )
    .await?;
    Ok(Fixture {
        context,
        writers,
        dirs,
    })
}

async fn fixture() -> Fixture {
    let dirs = TempDir::new().unwrap();
    let config = test_config(&dirs);
    open_with(config, dirs, StaticPermissions::allow_all())
        .await
        .unwrap()
}

fn write_inverting_lut(dir: &Path) -> std::path::PathBuf {
    let mut text = String::from("TITLE \"Invert\"\nLUT_3D_SIZE 2\n");
    for b in 0..2 {
        for g in 0..2 {
            for r in 0..2 {
                text.push_str(&format!("{} {} {}\n", 1 - r, 1 - g, 1 - b));
            }
        }
    }
    let path = dir.join("invert.cube");
    std::fs::write(&path, text).unwrap();
    path
}

async fn wait_for_state<F>(context: &CameraContext, predicate: F) -> CameraState
where
    F: Fn(&CameraState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), context.state().wait_for(predicate))
        .await
        .expect("timed out waiting for state")
}

#[tokio::test]
async fn test_camera_permission_denied() {
    let dirs = TempDir::new().unwrap();
    let config = test_config(&dirs);
    let permissions = StaticPermissions {
        camera: Authorization::Denied,
        microphone: Authorization::Authorized,
    };

    match open_with(config, dirs, permissions).await {
        Err(CameraError::Unauthorized { resource }) => assert_eq!(resource, "camera"),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("context opened without camera access"),
    }
}

#[tokio::test]
async fn test_graded_recording_reaches_library() {
    let f = fixture().await;
    let lut_path = write_inverting_lut(f.dirs.path());
    let cube = f.context.load_lut(&lut_path).await.unwrap();
    assert_eq!(cube.size(), 2);

    f.context.start_session().await.unwrap();
    f.context.start_recording().await.unwrap();
    wait_for_state(&f.context, |state| {
        state.recording_state == crate::recording::RecordingState::Writing
    })
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let finished = f.context.stop_recording().await.unwrap().unwrap();
    assert!(finished.location.starts_with(f.dirs.path().join("library")));
    assert!(finished.location.exists());
    assert!(finished.stats.video_appended > 0);
    assert!(finished.thumbnail.is_some());

    {
        let log = f.writers.log();
        let log = log.lock();
        assert!(log
            .video
            .windows(2)
            .all(|pair| pair[0].pts < pair[1].pts));
        let config = &log.configs[0];
        assert_eq!(config.video.width, 1920);
        assert!(config.audio.is_some());
    }

    let state = wait_for_state(&f.context, |state| {
        state.last_recording.is_some() && state.thumbnail.is_some()
    })
    .await;
    assert!(state.lut_active);
    assert_eq!(state.lut_title.as_deref(), Some("Invert"));
    assert!(!state.recording);
    f.context.shutdown().await;
}

#[tokio::test]
async fn test_microphone_denied_records_without_audio() {
    let dirs = TempDir::new().unwrap();
    let config = test_config(&dirs);
    let f = open_with(config, dirs, StaticPermissions::without_microphone())
        .await
        .unwrap();

    f.context.start_session().await.unwrap();
    f.context.start_recording().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    f.context.stop_recording().await.unwrap();

    let log = f.writers.log();
    let log = log.lock();
    assert!(log.configs[0].audio.is_none());
    assert!(log.audio.is_empty());
}

#[tokio::test]
async fn test_recording_requires_running_session() {
    let f = fixture().await;
    assert!(matches!(
        f.context.start_recording().await,
        Err(CameraError::RecordingFailed { .. })
    ));
    let state = wait_for_state(&f.context, |state| state.last_error.is_some()).await;
    assert_eq!(
        state.last_error.map(|error| error.kind()),
        Some("recording_failed")
    );
    assert!(!f.context.is_recording());
}

#[tokio::test]
async fn test_format_and_codec_locked_while_recording() {
    let f = fixture().await;
    f.context.set_codec(VideoCodec::ProRes422Hq).await.unwrap();
    f.context.start_session().await.unwrap();
    f.context.start_recording().await.unwrap();

    assert!(matches!(
        f.context.set_resolution(3840, 2160).await,
        Err(CameraError::ConfigurationFailed { .. })
    ));
    assert!(matches!(
        f.context.set_codec(VideoCodec::Hevc).await,
        Err(CameraError::ConfigurationFailed { .. })
    ));
    assert_eq!(f.context.codec(), VideoCodec::ProRes422Hq);

    tokio::time::sleep(Duration::from_millis(200)).await;
    f.context.stop_recording().await.unwrap();
    assert_eq!(
        f.writers.log().lock().configs[0].video.codec,
        VideoCodec::ProRes422Hq
    );

    f.context.set_resolution(3840, 2160).await.unwrap();
    f.context.set_log_color(true).await.unwrap();
    let params = f.context.parameters().await.unwrap();
    assert_eq!(params.format.resolution(), (3840, 2160));
    assert!(params.log_color);
    f.context.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_frame_rate_keeps_format() {
    let f = fixture().await;
    f.context.set_resolution(3840, 2160).await.unwrap();
    let before = f.context.parameters().await.unwrap();

    assert!(matches!(
        f.context.set_frame_rate(FrameRate::Fps60).await,
        Err(CameraError::ConfigurationFailed { .. })
    ));
    assert_eq!(f.context.parameters().await.unwrap(), before);
}

#[tokio::test]
async fn test_bad_lut_keeps_previous_grade() {
    let f = fixture().await;
    let good = write_inverting_lut(f.dirs.path());
    f.context.load_lut(&good).await.unwrap();

    let bad = f.dirs.path().join("broken.cube");
    std::fs::write(&bad, "LUT_3D_SIZE 2\n0 0 0\n1 1 1\n").unwrap();
    assert!(matches!(
        f.context.load_lut(&bad).await,
        Err(CameraError::ConfigurationFailed { .. })
    ));

    let state = wait_for_state(&f.context, |state| state.last_error.is_some()).await;
    assert!(state.lut_active);
    assert_eq!(state.lut_title.as_deref(), Some("Invert"));

    f.context.clear_lut().await.unwrap();
    let state = wait_for_state(&f.context, |state| !state.lut_active).await;
    assert_eq!(state.lut_title, None);
}

#[tokio::test]
async fn test_grade_presence_locked_while_recording() {
    let f = fixture().await;
    let invert = write_inverting_lut(f.dirs.path());
    f.context.start_session().await.unwrap();

    // An ungraded clip stays ungraded
    f.context.start_recording().await.unwrap();
    assert!(matches!(
        f.context.load_lut(&invert).await,
        Err(CameraError::ConfigurationFailed { .. })
    ));
    assert!(!f.context.snapshot().lut_active);
    tokio::time::sleep(Duration::from_millis(100)).await;
    f.context.stop_recording().await.unwrap();

    // A graded clip may swap LUTs but not drop its grade
    f.context.load_lut(&invert).await.unwrap();
    f.context.start_recording().await.unwrap();
    f.context.load_lut(&invert).await.unwrap();
    assert!(matches!(
        f.context.clear_lut().await,
        Err(CameraError::ConfigurationFailed { .. })
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    f.context.stop_recording().await.unwrap();

    assert_eq!(f.writers.log().lock().configs.len(), 2);
    f.context.clear_lut().await.unwrap();
    let state = wait_for_state(&f.context, |state| !state.lut_active).await;
    assert!(!state.recording);
    f.context.shutdown().await;
}

#[tokio::test]
async fn test_lens_switch_while_recording_stays_digital() {
    let f = fixture().await;
    f.context.start_session().await.unwrap();
    f.context.start_recording().await.unwrap();

    assert_eq!(
        f.context.switch_lens(5.0).await.unwrap(),
        LensSwitch::Zoomed { zoom: 5.0 }
    );
    assert_eq!(
        f.context.parameters().await.unwrap().device.id,
        "back-wide"
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    f.context.stop_recording().await.unwrap();

    assert!(matches!(
        f.context.switch_lens(5.0).await.unwrap(),
        LensSwitch::Swapped { .. }
    ));
    f.context.shutdown().await;
}

#[tokio::test]
async fn test_initial_zoom_selects_lens() {
    let dirs = TempDir::new().unwrap();
    let mut config = test_config(&dirs);
    config.camera.initial_zoom = 5.0;
    let f = open_with(config, dirs, StaticPermissions::allow_all())
        .await
        .unwrap();

    let params = f.context.parameters().await.unwrap();
    assert_eq!(params.device.id, "back-tele");
    assert_eq!(params.zoom, 1.0);

    let state = wait_for_state(&f.context, |state| {
        state
            .lens
            .as_ref()
            .is_some_and(|lens| lens.device_id == "back-tele")
    })
    .await;
    assert_eq!(state.lens.map(|lens| lens.nominal_zoom), Some(5.0));
}

#[tokio::test]
async fn test_orientation_reports_reach_snapshot() {
    let f = fixture().await;
    assert_eq!(
        f.context
            .report_orientation(InterfaceOrientation::LandscapeLeft)
            .await,
        OrientationUpdate::Changed(crate::frame::Rotation::Rotate180)
    );
    wait_for_state(&f.context, |state| {
        state.rotation == Some(crate::frame::Rotation::Rotate180)
    })
    .await;
}
