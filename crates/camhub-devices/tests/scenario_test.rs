//! End-to-end flow through the manager with a simulated family.
//!
//! 1. Open a camera by identity
//! 2. Configure exposure and gain
//! 3. Capture a frame and an HDR bracket
//! 4. Close, then confirm the session is unusable

use std::sync::Arc;

use camhub_core::{CameraConfig, CameraSettings, DriverKind, ErrorKind};
use camhub_devices::{CameraManager, DriverRegistry, HdrOptions, MockFactory};
use tokio::test;

#[test]
async fn test_open_configure_capture_close() {
    let mut registry = DriverRegistry::new();
    registry.register(
        "MockFamily",
        DriverKind::Mock,
        Arc::new(MockFactory::new("MockFamily").with_device("dev1")),
    );
    let manager = CameraManager::new(registry, CameraConfig::default()).unwrap();

    assert_eq!(
        manager.discover(None, true).await,
        vec!["MockFamily:dev1"]
    );

    let camera = manager.open("MockFamily:dev1").await.unwrap();

    let settings = CameraSettings::new().with_exposure(20000.0).with_gain(2.0);
    assert!(camera.configure(&settings).await.unwrap());

    let frame = camera.capture(None).await.unwrap();
    assert_eq!(frame.channels(), 3);
    assert_eq!(frame.data.len(), frame.expected_len());

    let bracket = camera.capture_hdr(&HdrOptions::new(3, 2.0)).await.unwrap();
    assert_eq!(bracket.images().unwrap().len(), 3);
    assert_eq!(camera.exposure().await.unwrap(), 20000.0);

    manager.close("MockFamily:dev1").await.unwrap();
    assert!(!manager.is_active("MockFamily:dev1").await);

    let err = camera.capture(None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}
