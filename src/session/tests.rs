use super::core::SessionCore;
use super::reconfigure::Reconfiguration;
use super::*;
use crate::device::SimulatedBackend;
use crate::frame::{AudioFrame, FrameData};
use parking_lot::Mutex as SyncMutex;
use std::time::Duration;

#[derive(Default)]
struct CollectingSink {
    video: SyncMutex<Vec<FrameData>>,
    audio: SyncMutex<usize>,
}

impl FrameSink for CollectingSink {
    fn on_video_frame(&self, frame: FrameData) {
        self.video.lock().push(frame);
    }

    fn on_audio_frame(&self, _frame: AudioFrame) {
        *self.audio.lock() += 1;
    }
}

struct Fixture {
    backend: SimulatedBackend,
    controller: Arc<CaptureSessionController>,
    orientation: Arc<OrientationCoordinator>,
    events: EventBus,
    sink: Arc<CollectingSink>,
}

fn settings() -> SessionSettings {
    SessionSettings {
        position: DevicePosition::Back,
        resolution: (1920, 1080),
        frame_rate: FrameRate::Fps30,
        log_color: false,
        audio: true,
        frame_queue_depth: 8,
    }
}

fn fixture() -> Fixture {
    fixture_with_bus(256)
}

fn fixture_with_bus(capacity: usize) -> Fixture {
    let backend = SimulatedBackend::multi_lens().with_frame_divisor(32);
    let orientation = Arc::new(OrientationCoordinator::new(
        crate::orientation::SensorMount::LandscapeRightNative,
        InterfaceOrientation::Portrait,
    ));
    let events = EventBus::new(capacity);
    let sink = Arc::new(CollectingSink::default());
    let controller = CaptureSessionController::new(
        Arc::new(backend.clone()),
        Arc::clone(&orientation),
        events.clone(),
        Arc::clone(&sink) as Arc<dyn FrameSink>,
        settings(),
    );
    Fixture {
        backend,
        controller,
        orientation,
        events,
        sink,
    }
}

async fn wait_for_event<F>(
    receiver: &mut broadcast::Receiver<CameraEvent>,
    predicate: F,
) -> CameraEvent
where
    F: Fn(&CameraEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match receiver.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn rotations(connections: &[Connection]) -> Vec<(OutputKind, Rotation)> {
    connections
        .iter()
        .map(|connection| (connection.output, connection.rotation()))
        .collect()
}

#[tokio::test]
async fn test_setup_selects_default_lens_and_orientation() {
    let f = fixture();
    let params = f.controller.setup().await.unwrap();

    assert_eq!(params.device.id, "back-wide");
    assert_eq!(params.format.resolution(), (1920, 1080));
    assert_eq!(params.frame_rate, FrameRate::Fps30);
    assert!(!f.controller.is_running().await);

    assert_eq!(
        rotations(&f.controller.connections().await),
        vec![
            (OutputKind::Preview, Rotation::Rotate90),
            (OutputKind::VideoData, Rotation::Rotate90),
            (OutputKind::AudioData, Rotation::Rotate0),
        ]
    );
    let (begins, commits) = f.controller.reconfiguration_counts().await;
    assert_eq!(begins, commits);
}

#[tokio::test]
async fn test_setup_without_device() {
    let backend = SimulatedBackend::new(Vec::new());
    let controller = CaptureSessionController::new(
        Arc::new(backend),
        Arc::new(OrientationCoordinator::new(
            Default::default(),
            InterfaceOrientation::Portrait,
        )),
        EventBus::new(8),
        Arc::new(CollectingSink::default()),
        settings(),
    );
    assert!(matches!(
        controller.setup().await,
        Err(CameraError::DeviceUnavailable { .. })
    ));
    assert!(matches!(
        controller.start().await,
        Err(CameraError::SetupFailed { .. })
    ));
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let f = fixture();
    let mut events = f.events.subscribe();
    f.controller.setup().await.unwrap();

    f.controller.start().await.unwrap();
    f.controller.start().await.unwrap();
    wait_for_event(&mut events, |event| {
        matches!(event, CameraEvent::SessionRunning { running: true })
    })
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    f.controller.stop().await;
    f.controller.stop().await;

    assert_eq!(f.backend.state().lock().stream_starts, 1);
    assert!(!f.controller.is_running().await);

    let frames = f.sink.video.lock();
    assert!(!frames.is_empty());
    assert!(frames.windows(2).all(|pair| pair[0].pts < pair[1].pts));
    assert!(*f.sink.audio.lock() > 0);
}

#[test]
fn test_start_inside_reconfiguration_fails_fast() {
    let mut core = SessionCore::new((1920, 1080), FrameRate::Fps30, false, false);
    let (tx, _rx) = mpsc::unbounded_channel();
    {
        let mut config = Reconfiguration::begin(&mut core);
        let result = config.start_streaming(Arc::new(CollectingSink::default()), 4, tx);
        assert!(matches!(result, Err(CameraError::SetupFailed { .. })));
        // Early exit without an explicit commit
    }
    assert!(!core.configuring);
    assert_eq!((core.begins, core.commits), (1, 1));

    Reconfiguration::begin(&mut core).commit();
    assert_eq!((core.begins, core.commits), (2, 2));
}

#[tokio::test]
async fn test_log_request_on_lens_without_log_4k() {
    let f = fixture();
    f.controller.setup().await.unwrap();
    f.controller.swap_input("back-ultra-wide").await.unwrap();
    let before = f.controller.parameters().await.unwrap();

    let err = f
        .controller
        .set_format(FormatRequest {
            width: 3840,
            height: 2160,
            frame_rate: FrameRate::Fps30,
            log_color: true,
        })
        .await
        .unwrap_err();

    match err {
        CameraError::ConfigurationFailed { reason: Some(reason) } => {
            assert!(reason.contains("color space"), "{}", reason)
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(f.controller.parameters().await.unwrap(), before);
}

#[tokio::test]
async fn test_set_format_applies_and_publishes() {
    let f = fixture();
    let mut events = f.events.subscribe();
    f.controller.setup().await.unwrap();

    let format = f
        .controller
        .set_format(FormatRequest {
            width: 3840,
            height: 2160,
            frame_rate: FrameRate::Fps24,
            log_color: true,
        })
        .await
        .unwrap();
    assert!(format.hdr);

    let event = wait_for_event(&mut events, |event| {
        matches!(event, CameraEvent::FormatChanged { width: 3840, .. })
    })
    .await;
    if let CameraEvent::FormatChanged {
        frame_rate,
        log_color,
        iso_range,
        ..
    } = event
    {
        assert_eq!(frame_rate, FrameRate::Fps24);
        assert!(log_color);
        assert_eq!(iso_range, (50.0, 2_500.0));
    }

    let state = f.backend.state();
    let state = state.lock();
    assert_eq!(state.frame_rates["back-wide"], FrameRate::Fps24);
    assert_eq!(state.lock_count, state.unlock_count);
}

#[tokio::test]
async fn test_lock_failure_keeps_previous_state() {
    let f = fixture();
    f.controller.setup().await.unwrap();
    f.controller.start().await.unwrap();
    let before = f.controller.parameters().await.unwrap();

    f.backend.fail_next_lock();
    let err = f
        .controller
        .set_format(FormatRequest {
            width: 1280,
            height: 720,
            frame_rate: FrameRate::Fps60,
            log_color: false,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CameraError::ConfigurationFailed { .. }));
    assert_eq!(f.controller.parameters().await.unwrap(), before);
    assert!(f.controller.is_running().await);
    let (begins, commits) = f.controller.reconfiguration_counts().await;
    assert_eq!(begins, commits);
    f.controller.stop().await;
}

#[tokio::test]
async fn test_swap_to_unavailable_device_keeps_current() {
    let f = fixture();
    f.controller.setup().await.unwrap();
    f.backend.set_unavailable("back-tele", true);

    assert!(matches!(
        f.controller.swap_input("back-tele").await,
        Err(CameraError::DeviceUnavailable { .. })
    ));
    assert_eq!(
        f.controller.parameters().await.unwrap().device.id,
        "back-wide"
    );
}

#[tokio::test]
async fn test_zoom_is_clamped() {
    let f = fixture();
    f.controller.setup().await.unwrap();

    assert_eq!(f.controller.set_zoom(50.0, None).await.unwrap(), 15.0);
    assert_eq!(f.controller.set_zoom(0.2, Some(2.0)).await.unwrap(), 1.0);
    assert_eq!(f.controller.parameters().await.unwrap().zoom, 1.0);
}

#[tokio::test]
async fn test_white_balance_and_torch() {
    let f = fixture();
    f.controller.setup().await.unwrap();

    f.controller.set_white_balance(5_600.0).await.unwrap();
    assert!(matches!(
        f.controller.set_white_balance(12_000.0).await,
        Err(CameraError::WhiteBalance { .. })
    ));
    f.backend.state().lock().reject_white_balance = true;
    assert!(matches!(
        f.controller.set_white_balance(4_000.0).await,
        Err(CameraError::WhiteBalance { .. })
    ));

    f.controller.set_torch(2.0).await.unwrap();
    assert_eq!(f.backend.state().lock().torch["back-wide"], 1.0);

    f.controller.swap_input("front").await.unwrap();
    assert!(matches!(
        f.controller.set_torch(0.5).await,
        Err(CameraError::ConfigurationFailed { .. })
    ));
}

#[tokio::test]
async fn test_interruption_restarts_once() {
    let f = fixture();
    let mut events = f.events.subscribe();
    f.controller.setup().await.unwrap();
    f.controller.start().await.unwrap();

    f.backend.interrupt("media services were reset");
    wait_for_event(&mut events, |event| {
        matches!(event, CameraEvent::SessionInterrupted { .. })
    })
    .await;
    wait_for_event(&mut events, |event| {
        matches!(event, CameraEvent::SessionRunning { running: true })
    })
    .await;

    assert!(f.controller.is_running().await);
    assert_eq!(f.backend.state().lock().stream_starts, 2);
    f.controller.shutdown().await;
}

#[tokio::test]
async fn test_orientation_held_during_recording_lock() {
    let f = fixture();
    f.controller.setup().await.unwrap();

    assert_eq!(
        f.controller
            .report_orientation(InterfaceOrientation::LandscapeRight)
            .await,
        OrientationUpdate::Changed(Rotation::Rotate0)
    );

    f.orientation.lock_for_recording();
    assert_eq!(
        f.controller
            .report_orientation(InterfaceOrientation::PortraitUpsideDown)
            .await,
        OrientationUpdate::Suppressed
    );
    f.controller.reapply_orientation().await;
    assert!(rotations(&f.controller.connections().await)
        .iter()
        .all(|(_, rotation)| *rotation == Rotation::Rotate0));

    // Recording ends: pending orientation is folded in and the monitor reapplies
    let (_, pending) = f.orientation.unlock();
    f.orientation.update(pending.unwrap());
    f.events.emit(CameraEvent::RecordingStateChanged {
        state: RecordingState::Idle,
    });

    let applied = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let connections = f.controller.connections().await;
            if connections[1].rotation() == Rotation::Rotate270 {
                return connections;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(applied[0].rotation(), Rotation::Rotate270);
}

#[tokio::test]
async fn test_missed_idle_still_reapplies_orientation() {
    let f = fixture_with_bus(2);
    f.controller.setup().await.unwrap();
    f.orientation.lock_for_recording();
    f.controller
        .report_orientation(InterfaceOrientation::PortraitUpsideDown)
        .await;

    let (_, pending) = f.orientation.unlock();
    f.orientation.update(pending.unwrap());
    // The monitor cannot run between these, so the `Idle` is lost to lag
    f.events.emit(CameraEvent::RecordingStateChanged {
        state: RecordingState::Idle,
    });
    for frames in 1..=8 {
        f.events.emit(CameraEvent::FrameStatistics {
            frames,
            fps: 30.0,
            lut_frames: 0,
            fallbacks: 0,
        });
    }

    let applied = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let connections = f.controller.connections().await;
            if connections[1].rotation() == Rotation::Rotate270 {
                return connections;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(applied[0].rotation(), Rotation::Rotate270);
}
