//! Session tests: retry policy, configure, lifecycle, device exclusivity.

use std::sync::Arc;
use std::time::Duration;

use camhub_core::{CameraConfig, CameraError, CameraSettings, DeviceIdentity, ErrorKind, Roi};
use camhub_devices::registry::DriverFactory;
use camhub_devices::{
    CameraSession, CaptureGate, HdrOptions, MockBehavior, MockFactory, MockFault, MockProbe,
    SessionOptions,
};
use tokio::time::Instant;

async fn open_session(
    behavior: MockBehavior,
    retry_count: u32,
) -> (Arc<CameraSession>, Arc<MockProbe>) {
    let config = CameraConfig {
        retry_count,
        ..CameraConfig::default()
    };
    let factory = MockFactory::new("MockFamily").with_device_behavior("dev1", behavior);
    let probe = factory.probe("dev1");
    let driver = factory.create("dev1", &config).unwrap();
    let gate = Arc::new(CaptureGate::new(config.max_concurrent_captures).unwrap());

    let session = CameraSession::open(
        DeviceIdentity::new("MockFamily", "dev1"),
        driver,
        gate,
        SessionOptions::from(&config),
    )
    .await
    .unwrap();
    (Arc::new(session), probe)
}

#[tokio::test(start_paused = true)]
async fn test_capture_retries_with_exponential_backoff() {
    let (session, probe) = open_session(
        MockBehavior::new().always_failing(MockFault::Error(ErrorKind::Capture)),
        3,
    )
    .await;

    let start = Instant::now();
    let err = session.capture(None).await.unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err.kind(), ErrorKind::Capture);
    assert!(err.to_string().contains("failed after 3 attempts"));
    assert_eq!(probe.capture_calls(), 3);

    let times = probe.capture_times();
    assert_eq!(times.len(), 3);
    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];
    assert!(first_gap >= Duration::from_millis(100) && first_gap < Duration::from_millis(105));
    assert!(second_gap >= Duration::from_millis(200) && second_gap < Duration::from_millis(205));

    // No sleep after the final attempt
    assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(305));
}

#[tokio::test(start_paused = true)]
async fn test_capture_recovers_after_transient_faults() {
    let (session, probe) = open_session(
        MockBehavior::new()
            .with_capture_faults([MockFault::NoFrame, MockFault::Error(ErrorKind::Timeout)]),
        3,
    )
    .await;

    let start = Instant::now();
    let frame = session.capture(None).await.unwrap();
    assert_eq!(frame.channels(), 3);
    assert_eq!(probe.capture_calls(), 3);

    // 100 ms after the missing frame, 300 * 2 ms after the timeout
    assert!(start.elapsed() >= Duration::from_millis(700));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_propagates_immediately() {
    let (session, probe) = open_session(
        MockBehavior::new().always_failing(MockFault::Error(ErrorKind::Configuration)),
        5,
    )
    .await;

    let err = session.capture(None).await.unwrap_err();
    assert!(matches!(err, CameraError::Configuration(_)));
    assert_eq!(probe.capture_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_error_wrapped_after_exhaustion() {
    let (session, probe) = open_session(
        MockBehavior::new().always_failing(MockFault::Error(ErrorKind::Unexpected)),
        2,
    )
    .await;

    let err = session.capture(None).await.unwrap_err();
    assert!(matches!(err, CameraError::Runtime { attempts: 2, .. }));
    assert_eq!(probe.capture_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_capture_times_out() {
    let (session, probe) = open_session(
        MockBehavior::new().with_capture_delay(Duration::from_secs(30)),
        1,
    )
    .await;

    let err = session.capture(None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(probe.capture_calls(), 1);
}

#[tokio::test]
async fn test_capture_saves_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames/dev1.png");
    let (session, _) = open_session(MockBehavior::new(), 1).await;

    let frame = session.capture(Some(&path)).await.unwrap();
    let saved = image::open(&path).unwrap();
    assert_eq!(saved.width(), frame.width);
    assert_eq!(saved.height(), frame.height);
}

#[tokio::test]
async fn test_configure_applies_all_settings() {
    let (session, _) = open_session(MockBehavior::new(), 3).await;

    let settings = CameraSettings::new()
        .with_exposure(20000.0)
        .with_gain(2.0)
        .with_roi(Roi::new(0, 0, 320, 240))
        .with_pixel_format("RGB8");
    assert!(session.configure(&settings).await.unwrap());

    assert_eq!(session.exposure().await.unwrap(), 20000.0);
    assert_eq!(session.gain().await.unwrap(), 2.0);
    assert_eq!(session.pixel_format().await.unwrap(), "RGB8");

    let frame = session.capture(None).await.unwrap();
    assert_eq!((frame.width, frame.height), (320, 240));

    assert!(session.reset_roi().await.unwrap());
    assert_eq!(session.roi().await.unwrap(), Roi::full_sensor(640, 480));
}

#[tokio::test]
async fn test_configure_reports_rejected_settings() {
    let (session, _) = open_session(MockBehavior::new().rejecting_writes(), 3).await;

    let settings = CameraSettings::new().with_exposure(20000.0).with_gain(2.0);
    assert!(!session.configure(&settings).await.unwrap());
}

#[tokio::test]
async fn test_configure_propagates_invalid_value() {
    let (session, _) = open_session(MockBehavior::new(), 3).await;

    let settings = CameraSettings::new().with_gain(100.0);
    let err = session.configure(&settings).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_export_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("configs/nested/dev1.json");
    let (session, _) = open_session(MockBehavior::new(), 3).await;

    session.set_exposure(4321.0).await.unwrap();
    assert!(session.export_config(&path).await.unwrap());
    assert!(path.exists());

    session.set_exposure(100.0).await.unwrap();
    assert!(session.import_config(&path).await.unwrap());
    assert_eq!(session.exposure().await.unwrap(), 4321.0);
}

#[tokio::test]
async fn test_closed_session_fails_fast() {
    let (session, probe) = open_session(MockBehavior::new(), 3).await;

    session.close().await.unwrap();
    assert!(session.is_closed());
    assert_eq!(probe.close_calls(), 1);

    let err = session.capture(None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    let err = session.configure(&CameraSettings::new().with_gain(1.0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(probe.capture_calls(), 0);

    // Session-level close is not idempotent
    let err = session.close().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(probe.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_interrupts_retry_backoff() {
    let (session, probe) = open_session(
        MockBehavior::new().always_failing(MockFault::Error(ErrorKind::Capture)),
        5,
    )
    .await;

    let capture = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.capture(None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.close().await.unwrap();

    let err = capture.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(probe.capture_calls(), 1);
    assert_eq!(probe.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_device_operations_wait_for_bracket() {
    let (session, probe) = open_session(MockBehavior::new(), 3).await;
    assert!(session
        .configure(&CameraSettings::new().with_exposure(20000.0))
        .await
        .unwrap());

    let bracket = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.capture_hdr(&HdrOptions::new(3, 2.0)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Both queue behind the bracket and run in arrival order
    let settings = CameraSettings::new().with_exposure(5000.0);
    let (configured, frame) = tokio::join!(
        session.configure(&settings),
        session.capture(None),
    );
    assert!(configured.unwrap());
    frame.unwrap();

    let levels: Vec<f64> = bracket
        .await
        .unwrap()
        .unwrap()
        .images()
        .unwrap()
        .iter()
        .map(|level| level.exposure)
        .collect();
    assert_eq!(levels, vec![10000.0, 20000.0, 40000.0]);
    assert_eq!(
        probe.exposure_writes(),
        vec![20000.0, 10000.0, 20000.0, 40000.0, 20000.0, 5000.0]
    );
    assert_eq!(probe.capture_calls(), 4);
    assert_eq!(session.exposure().await.unwrap(), 5000.0);
}

#[tokio::test]
async fn test_failed_initialize_releases_driver() {
    let config = CameraConfig::default();
    let factory = MockFactory::new("MockFamily")
        .with_device_behavior("dev1", MockBehavior::new().failing_initialize());
    let probe = factory.probe("dev1");
    let gate = Arc::new(CaptureGate::new(1).unwrap());

    let err = CameraSession::open(
        DeviceIdentity::new("MockFamily", "dev1"),
        factory.create("dev1", &config).unwrap(),
        gate,
        SessionOptions::default(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Initialization);
    assert_eq!(probe.initialize_calls(), 1);
    assert_eq!(probe.close_calls(), 1);
}
