use super::*;
use crossbeam::channel::bounded;

fn wide_hd(backend: &SimulatedBackend) -> FormatDescriptor {
    backend
        .devices()
        .into_iter()
        .find(|device| device.id == "back-wide")
        .and_then(|device| {
            device
                .formats
                .into_iter()
                .find(|format| format.resolution() == (1920, 1080))
        })
        .unwrap()
}

#[test]
fn test_default_device_prefers_one_x_lens() {
    let backend = SimulatedBackend::multi_lens();
    let back = backend.default_device(DevicePosition::Back).unwrap();
    assert_eq!(back.id, "back-wide");
    let front = backend.default_device(DevicePosition::Front).unwrap();
    assert_eq!(front.id, "front");
}

#[test]
fn test_open_unavailable_device() {
    let backend = SimulatedBackend::multi_lens();
    backend.set_unavailable("back-tele", true);

    assert!(matches!(
        backend.open("back-tele"),
        Err(CameraError::DeviceUnavailable { .. })
    ));
    assert!(matches!(
        backend.open("missing"),
        Err(CameraError::DeviceUnavailable { .. })
    ));

    backend.set_unavailable("back-tele", false);
    assert!(backend.open("back-tele").is_ok());
}

#[test]
fn test_mutation_requires_configuration_lock() {
    let backend = SimulatedBackend::multi_lens();
    let mut handle = backend.open("back-wide").unwrap();
    let format = wide_hd(&backend);

    assert!(matches!(
        handle.set_active_format(&format),
        Err(CameraError::ConfigurationFailed { .. })
    ));

    handle.lock_for_configuration().unwrap();
    handle.set_active_format(&format).unwrap();
    handle.set_frame_duration(FrameRate::Fps60).unwrap();
    handle.unlock_for_configuration();

    let state = backend.state();
    let state = state.lock();
    assert_eq!(state.active_formats["back-wide"].resolution(), (1920, 1080));
    assert_eq!(state.frame_rates["back-wide"], FrameRate::Fps60);
}

#[test]
fn test_device_lock_releases_on_drop() {
    let backend = SimulatedBackend::multi_lens();
    let mut handle = backend.open("back-wide").unwrap();

    {
        let mut lock = DeviceLock::acquire(handle.as_mut()).unwrap();
        // A failing call inside the lock must not leak it
        assert!(lock.set_zoom_factor(100.0).is_err());
    }

    let state = backend.state();
    let state = state.lock();
    assert_eq!(state.lock_count, 1);
    assert_eq!(state.unlock_count, 1);
    assert_eq!(
        state.calls,
        vec!["open:back-wide", "lock:back-wide", "unlock:back-wide"]
    );
}

#[test]
fn test_failed_lock_is_not_released() {
    let backend = SimulatedBackend::multi_lens();
    let mut handle = backend.open("back-wide").unwrap();
    backend.fail_next_lock();

    assert!(DeviceLock::acquire(handle.as_mut()).is_err());
    assert_eq!(backend.state().lock().unlock_count, 0);
}

#[test]
fn test_torch_and_white_balance_capabilities() {
    let backend = SimulatedBackend::multi_lens();
    let mut front = backend.open("front").unwrap();
    let mut lock = DeviceLock::acquire(front.as_mut()).unwrap();
    assert!(matches!(
        lock.set_torch(1.0),
        Err(CameraError::ConfigurationFailed { .. })
    ));
    lock.set_white_balance(5600.0).unwrap();
    drop(lock);

    backend.state().lock().reject_white_balance = true;
    let mut lock = DeviceLock::acquire(front.as_mut()).unwrap();
    assert!(matches!(
        lock.set_white_balance(3200.0),
        Err(CameraError::WhiteBalance { .. })
    ));
}

#[test]
fn test_frame_rate_timing_is_exact() {
    assert_eq!(FrameRate::Fps30.pts_of(150), Duration::from_secs(5));
    assert_eq!(FrameRate::Fps25.frame_duration(), Duration::from_millis(40));
    // 1001/24000 s per frame, 24000 frames is exactly 1001 seconds
    assert_eq!(FrameRate::Fps23_976.pts_of(24_000), Duration::from_secs(1001));
    assert_eq!(FrameRate::from_fps(29.97), Some(FrameRate::Fps29_97));
    assert_eq!(FrameRate::from_fps(31.0), None);
    assert_eq!(FrameRate::Fps23_976.to_string(), "23.976");
    assert_eq!(FrameRate::Fps60.to_string(), "60");
}

#[test]
fn test_connection_rejects_unsupported_rotation() {
    let mut connection =
        Connection::new(OutputKind::VideoData, vec![Rotation::Rotate0, Rotation::Rotate90], false);
    assert!(connection.set_rotation(Rotation::Rotate90));
    assert!(!connection.set_rotation(Rotation::Rotate180));
    assert_eq!(connection.rotation(), Rotation::Rotate90);
}

#[test]
fn test_streaming_delivers_ordered_frames() {
    let backend = SimulatedBackend::multi_lens().with_frame_divisor(16);
    let mut handle = backend.open("back-wide").unwrap();
    {
        let mut lock = DeviceLock::acquire(handle.as_mut()).unwrap();
        lock.set_active_format(&wide_hd(&backend)).unwrap();
        lock.set_frame_duration(FrameRate::Fps60).unwrap();
    }

    let (video_tx, video_rx) = bounded(32);
    let (audio_tx, audio_rx) = bounded(32);
    handle
        .start_streaming(SampleOutputs {
            video: video_tx,
            audio: Some(audio_tx),
        })
        .unwrap();

    let mut frames = Vec::new();
    while frames.len() < 5 {
        match video_rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            SensorEvent::Frame(frame) => frames.push(frame),
            SensorEvent::Interrupted { reason } => panic!("interrupted: {}", reason),
        }
    }
    handle.stop_streaming();

    assert_eq!(frames[0].width, 1920 / 16);
    assert!(frames.iter().all(|frame| frame.validate_size()));
    for pair in frames.windows(2) {
        assert!(pair[1].pts > pair[0].pts);
        assert_eq!(pair[1].id, pair[0].id + 1);
    }
    assert_eq!(frames[1].pts - frames[0].pts, FrameRate::Fps60.pts_of(1));

    let audio = audio_rx.try_recv().unwrap();
    assert_eq!(audio.sample_rate, 48_000);
    assert_eq!(audio.channels, 2);
    assert!(backend.state().lock().streaming_device.is_none());
}

#[test]
fn test_interruption_is_delivered() {
    let backend = SimulatedBackend::multi_lens().with_frame_divisor(16);
    let mut handle = backend.open("back-wide").unwrap();
    {
        let mut lock = DeviceLock::acquire(handle.as_mut()).unwrap();
        lock.set_active_format(&wide_hd(&backend)).unwrap();
    }

    let (video_tx, video_rx) = bounded(8);
    handle
        .start_streaming(SampleOutputs {
            video: video_tx,
            audio: None,
        })
        .unwrap();
    backend.interrupt("media services reset");

    let interrupted = (0..100).any(|_| {
        matches!(
            video_rx.recv_timeout(Duration::from_secs(2)),
            Ok(SensorEvent::Interrupted { .. })
        )
    });
    assert!(interrupted);
}
