//! Simulated camera family.
//!
//! Used for tests, demos and development machines without vendor SDKs. Each
//! device can be given a [`MockBehavior`] to inject faults, and every device
//! reports what happened to it through a shared [`MockProbe`].

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use camhub_core::{
    CameraConfig, CameraDriver, CameraError, ColorOrder, DiscoveredCamera, ErrorKind, Frame,
    Result, Roi, TriggerMode, ValueRange, WhiteBalanceMode,
};

use crate::registry::DriverFactory;

const EXPOSURE_RANGE: ValueRange = ValueRange {
    min: 10.0,
    max: 1_000_000.0,
};
const GAIN_RANGE: ValueRange = ValueRange { min: 0.0, max: 24.0 };
const PIXEL_FORMATS: [&str; 4] = ["BGR8", "RGB8", "Mono8", "BayerRG8"];
const WHITE_BALANCE_MODES: [WhiteBalanceMode; 3] = [
    WhiteBalanceMode::Off,
    WhiteBalanceMode::Once,
    WhiteBalanceMode::Continuous,
];
const DEFAULT_EXPOSURE: f64 = 10_000.0;
const MOCK_FPS: f64 = 30.0;

/// A simulated capture failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// Driver reports no frame
    NoFrame,
    /// Driver raises an error of this kind
    Error(ErrorKind),
}

impl MockFault {
    fn into_result(self, device: &str) -> Result<Option<Frame>> {
        match self {
            Self::NoFrame => Ok(None),
            Self::Error(kind) => Err(CameraError::from_kind(
                kind,
                format!("Simulated {} fault on {}", kind, device),
            )),
        }
    }
}

/// Fault injection for one mock device.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub fail_initialize: bool,
    pub connection_ok: bool,
    /// Faults consumed by successive captures before normal operation
    pub capture_faults: Vec<MockFault>,
    /// Fault returned by every capture after the scripted ones
    pub persistent_fault: Option<MockFault>,
    /// Captures fail while the exposure is above this value
    pub fail_above_exposure: Option<f64>,
    pub capture_delay: Duration,
    /// Setters validate but report the value as not accepted
    pub reject_writes: bool,
    pub fail_close: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            fail_initialize: false,
            connection_ok: true,
            capture_faults: Vec::new(),
            persistent_fault: None,
            fail_above_exposure: None,
            capture_delay: Duration::ZERO,
            reject_writes: false,
            fail_close: false,
        }
    }
}

impl MockBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_connection(mut self) -> Self {
        self.connection_ok = false;
        self
    }

    pub fn with_capture_faults(mut self, faults: impl IntoIterator<Item = MockFault>) -> Self {
        self.capture_faults.extend(faults);
        self
    }

    pub fn always_failing(mut self, fault: MockFault) -> Self {
        self.persistent_fault = Some(fault);
        self
    }

    pub fn failing_above_exposure(mut self, exposure: f64) -> Self {
        self.fail_above_exposure = Some(exposure);
        self
    }

    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn rejecting_writes(mut self) -> Self {
        self.reject_writes = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

/// Observations recorded by one mock device.
#[derive(Debug, Default)]
pub struct MockProbe {
    initialize_calls: AtomicU32,
    capture_calls: AtomicU32,
    close_calls: AtomicU32,
    capture_times: Mutex<Vec<Instant>>,
    exposure_writes: Mutex<Vec<f64>>,
}

impl MockProbe {
    pub fn initialize_calls(&self) -> u32 {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> u32 {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Start instants of every capture call.
    pub fn capture_times(&self) -> Vec<Instant> {
        self.capture_times.lock().clone()
    }

    /// Every exposure value written, accepted or not.
    pub fn exposure_writes(&self) -> Vec<f64> {
        self.exposure_writes.lock().clone()
    }
}

/// Peak number of simultaneous captures across a family.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    fn enter(self: &Arc<Self>) -> TrackerGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        TrackerGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct TrackerGuard {
    tracker: Arc<ConcurrencyTracker>,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.tracker.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Factory for a mock family.
pub struct MockFactory {
    family: String,
    devices: Vec<String>,
    behaviors: HashMap<String, MockBehavior>,
    probes: DashMap<String, Arc<MockProbe>>,
    concurrency: Arc<ConcurrencyTracker>,
    width: u32,
    height: u32,
}

impl MockFactory {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            devices: Vec::new(),
            behaviors: HashMap::new(),
            probes: DashMap::new(),
            concurrency: Arc::new(ConcurrencyTracker::default()),
            width: camhub_core::config::defaults::MOCK_WIDTH,
            height: camhub_core::config::defaults::MOCK_HEIGHT,
        }
    }

    /// Family with devices `mock_cam_0` .. `mock_cam_{count-1}`.
    pub fn with_device_count(family: impl Into<String>, count: usize) -> Self {
        let mut factory = Self::new(family);
        factory.devices = (0..count).map(|i| format!("mock_cam_{}", i)).collect();
        factory
    }

    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.devices.contains(&name) {
            self.devices.push(name);
        }
        self
    }

    pub fn with_device_behavior(mut self, name: impl Into<String>, behavior: MockBehavior) -> Self {
        let name = name.into();
        self = self.with_device(name.clone());
        self.behaviors.insert(name, behavior);
        self
    }

    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Probe of `device`; the same probe is shared by every driver created
    /// for that device.
    pub fn probe(&self, device: &str) -> Arc<MockProbe> {
        self.probes
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(MockProbe::default()))
            .clone()
    }

    pub fn concurrency(&self) -> Arc<ConcurrencyTracker> {
        Arc::clone(&self.concurrency)
    }
}

#[async_trait]
impl DriverFactory for MockFactory {
    async fn discover(&self, details: bool) -> Result<Vec<DiscoveredCamera>> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(index, name)| {
                if details {
                    DiscoveredCamera {
                        name: name.clone(),
                        index: Some(index as u32),
                        width: Some(self.width),
                        height: Some(self.height),
                        fps: Some(MOCK_FPS),
                    }
                } else {
                    DiscoveredCamera::named(name.clone())
                }
            })
            .collect())
    }

    fn create(&self, device: &str, config: &CameraConfig) -> Result<Box<dyn CameraDriver>> {
        if !self.devices.iter().any(|d| d == device) {
            return Err(CameraError::NotFound(format!(
                "{} has no device named '{}'",
                self.family, device
            )));
        }

        let behavior = self.behaviors.get(device).cloned().unwrap_or_default();
        Ok(Box::new(MockCamera::new(
            device,
            behavior,
            self.probe(device),
            self.concurrency(),
            config.retry_count,
            self.width,
            self.height,
        )))
    }
}

/// Settings persisted by `export_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MockSettings {
    exposure: f64,
    gain: f64,
    roi: Roi,
    trigger_mode: TriggerMode,
    pixel_format: String,
    white_balance: WhiteBalanceMode,
    image_enhancement: bool,
}

/// A simulated camera.
pub struct MockCamera {
    name: String,
    behavior: MockBehavior,
    scripted: VecDeque<MockFault>,
    probe: Arc<MockProbe>,
    concurrency: Arc<ConcurrencyTracker>,
    retry_count: u32,
    sensor_width: u32,
    sensor_height: u32,
    initialized: bool,
    settings: MockSettings,
}

impl MockCamera {
    pub fn new(
        name: impl Into<String>,
        behavior: MockBehavior,
        probe: Arc<MockProbe>,
        concurrency: Arc<ConcurrencyTracker>,
        retry_count: u32,
        sensor_width: u32,
        sensor_height: u32,
    ) -> Self {
        let scripted = behavior.capture_faults.iter().copied().collect();
        Self {
            name: name.into(),
            behavior,
            scripted,
            probe,
            concurrency,
            retry_count,
            sensor_width,
            sensor_height,
            initialized: false,
            settings: MockSettings {
                exposure: DEFAULT_EXPOSURE,
                gain: 0.0,
                roi: Roi::full_sensor(sensor_width, sensor_height),
                trigger_mode: TriggerMode::Continuous,
                pixel_format: PIXEL_FORMATS[0].to_string(),
                white_balance: WhiteBalanceMode::Off,
                image_enhancement: false,
            },
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(CameraError::Connection(format!(
                "Mock camera '{}' is not initialized",
                self.name
            )));
        }
        Ok(())
    }

    fn accepts_writes(&self) -> bool {
        !self.behavior.reject_writes
    }

    fn validate_roi(&self, roi: &Roi) -> Result<()> {
        let fits_x = roi.x.checked_add(roi.width).is_some_and(|end| end <= self.sensor_width);
        let fits_y = roi.y.checked_add(roi.height).is_some_and(|end| end <= self.sensor_height);
        if roi.width == 0 || roi.height == 0 || !fits_x || !fits_y {
            return Err(CameraError::Configuration(format!(
                "ROI {:?} outside sensor {}x{}",
                roi, self.sensor_width, self.sensor_height
            )));
        }
        Ok(())
    }

    fn validate_settings(&self, settings: &MockSettings) -> Result<()> {
        if !EXPOSURE_RANGE.contains(settings.exposure) {
            return Err(CameraError::Configuration(format!(
                "Exposure {} outside [{}, {}]",
                settings.exposure, EXPOSURE_RANGE.min, EXPOSURE_RANGE.max
            )));
        }
        if !GAIN_RANGE.contains(settings.gain) {
            return Err(CameraError::Configuration(format!(
                "Gain {} outside [{}, {}]",
                settings.gain, GAIN_RANGE.min, GAIN_RANGE.max
            )));
        }
        if !PIXEL_FORMATS.contains(&settings.pixel_format.as_str()) {
            return Err(CameraError::Configuration(format!(
                "Unsupported pixel format: {}",
                settings.pixel_format
            )));
        }
        self.validate_roi(&settings.roi)
    }

    /// Diagonal gradient whose brightness follows exposure and gain.
    fn render(&self) -> Frame {
        let roi = self.settings.roi;
        let brightness =
            (self.settings.exposure / 20_000.0 * (1.0 + self.settings.gain / 6.0)).min(4.0);
        let color_order = if self.settings.pixel_format == "RGB8" {
            ColorOrder::Rgb
        } else {
            ColorOrder::Bgr
        };

        let mut data = Vec::with_capacity(roi.width as usize * roi.height as usize * 3);
        for y in 0..roi.height {
            for x in 0..roi.width {
                let base = ((roi.x + x + roi.y + y) % 256) as f64;
                let value = (base * brightness).min(255.0) as u8;
                data.extend_from_slice(&[value, value / 2, 255 - value]);
            }
        }
        Frame::new(roi.width, roi.height, color_order, data)
    }
}

#[async_trait]
impl CameraDriver for MockCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    async fn initialize(&mut self) -> Result<bool> {
        self.probe.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_initialize {
            return Err(CameraError::Initialization(format!(
                "Simulated initialization failure on {}",
                self.name
            )));
        }
        self.initialized = true;
        Ok(true)
    }

    async fn capture(&mut self) -> Result<Option<Frame>> {
        self.ensure_initialized()?;
        self.probe.capture_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.capture_times.lock().push(Instant::now());

        let _active = self.concurrency.enter();
        if !self.behavior.capture_delay.is_zero() {
            tokio::time::sleep(self.behavior.capture_delay).await;
        }

        if let Some(fault) = self.scripted.pop_front() {
            return fault.into_result(&self.name);
        }
        if let Some(fault) = self.behavior.persistent_fault {
            return fault.into_result(&self.name);
        }
        if let Some(threshold) = self.behavior.fail_above_exposure {
            if self.settings.exposure > threshold {
                return Err(CameraError::Capture(format!(
                    "Simulated overexposure on {} at {}",
                    self.name, self.settings.exposure
                )));
            }
        }

        Ok(Some(self.render()))
    }

    async fn set_exposure(&mut self, exposure: f64) -> Result<bool> {
        self.ensure_initialized()?;
        self.probe.exposure_writes.lock().push(exposure);
        if !EXPOSURE_RANGE.contains(exposure) {
            return Err(CameraError::Configuration(format!(
                "Exposure {} outside [{}, {}]",
                exposure, EXPOSURE_RANGE.min, EXPOSURE_RANGE.max
            )));
        }
        if !self.accepts_writes() {
            return Ok(false);
        }
        self.settings.exposure = exposure;
        Ok(true)
    }

    async fn get_exposure(&mut self) -> Result<f64> {
        self.ensure_initialized()?;
        Ok(self.settings.exposure)
    }

    async fn get_exposure_range(&mut self) -> Result<ValueRange> {
        self.ensure_initialized()?;
        Ok(EXPOSURE_RANGE)
    }

    async fn set_gain(&mut self, gain: f64) -> Result<bool> {
        self.ensure_initialized()?;
        if !GAIN_RANGE.contains(gain) {
            return Err(CameraError::Configuration(format!(
                "Gain {} outside [{}, {}]",
                gain, GAIN_RANGE.min, GAIN_RANGE.max
            )));
        }
        if !self.accepts_writes() {
            return Ok(false);
        }
        self.settings.gain = gain;
        Ok(true)
    }

    async fn get_gain(&mut self) -> Result<f64> {
        self.ensure_initialized()?;
        Ok(self.settings.gain)
    }

    async fn get_gain_range(&mut self) -> Result<ValueRange> {
        self.ensure_initialized()?;
        Ok(GAIN_RANGE)
    }

    async fn set_roi(&mut self, roi: Roi) -> Result<bool> {
        self.ensure_initialized()?;
        self.validate_roi(&roi)?;
        if !self.accepts_writes() {
            return Ok(false);
        }
        self.settings.roi = roi;
        Ok(true)
    }

    async fn get_roi(&mut self) -> Result<Roi> {
        self.ensure_initialized()?;
        Ok(self.settings.roi)
    }

    async fn reset_roi(&mut self) -> Result<bool> {
        self.ensure_initialized()?;
        self.settings.roi = Roi::full_sensor(self.sensor_width, self.sensor_height);
        Ok(true)
    }

    async fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<bool> {
        self.ensure_initialized()?;
        if !self.accepts_writes() {
            return Ok(false);
        }
        self.settings.trigger_mode = mode;
        Ok(true)
    }

    async fn get_trigger_mode(&mut self) -> Result<TriggerMode> {
        self.ensure_initialized()?;
        Ok(self.settings.trigger_mode)
    }

    async fn set_pixel_format(&mut self, format: &str) -> Result<bool> {
        self.ensure_initialized()?;
        if !PIXEL_FORMATS.contains(&format) {
            return Err(CameraError::Configuration(format!(
                "Unsupported pixel format: {}",
                format
            )));
        }
        if !self.accepts_writes() {
            return Ok(false);
        }
        self.settings.pixel_format = format.to_string();
        Ok(true)
    }

    async fn get_current_pixel_format(&mut self) -> Result<String> {
        self.ensure_initialized()?;
        Ok(self.settings.pixel_format.clone())
    }

    async fn get_pixel_format_range(&mut self) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        Ok(PIXEL_FORMATS.iter().map(|f| f.to_string()).collect())
    }

    async fn set_auto_white_balance(&mut self, mode: WhiteBalanceMode) -> Result<bool> {
        self.ensure_initialized()?;
        if !self.accepts_writes() {
            return Ok(false);
        }
        self.settings.white_balance = mode;
        Ok(true)
    }

    async fn get_white_balance(&mut self) -> Result<WhiteBalanceMode> {
        self.ensure_initialized()?;
        Ok(self.settings.white_balance)
    }

    async fn get_white_balance_range(&mut self) -> Result<Vec<WhiteBalanceMode>> {
        self.ensure_initialized()?;
        Ok(WHITE_BALANCE_MODES.to_vec())
    }

    async fn set_image_quality_enhancement(&mut self, enabled: bool) -> Result<bool> {
        self.ensure_initialized()?;
        if !self.accepts_writes() {
            return Ok(false);
        }
        self.settings.image_enhancement = enabled;
        Ok(true)
    }

    async fn get_image_quality_enhancement(&mut self) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(self.settings.image_enhancement)
    }

    async fn export_config(&mut self, path: &Path) -> Result<bool> {
        self.ensure_initialized()?;
        let json = serde_json::to_vec_pretty(&self.settings)
            .map_err(|e| CameraError::Unexpected(format!("Failed to encode settings: {}", e)))?;
        tokio::fs::write(path, json).await?;
        Ok(true)
    }

    async fn import_config(&mut self, path: &Path) -> Result<bool> {
        self.ensure_initialized()?;
        let raw = tokio::fs::read(path).await?;
        let settings: MockSettings = serde_json::from_slice(&raw).map_err(|e| {
            CameraError::Configuration(format!("Invalid config {}: {}", path.display(), e))
        })?;
        self.validate_settings(&settings)?;
        self.settings = settings;
        Ok(true)
    }

    async fn check_connection(&mut self) -> Result<bool> {
        Ok(self.initialized && self.behavior.connection_ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
        self.initialized = false;
        if self.behavior.fail_close {
            return Err(CameraError::Connection(format!(
                "Simulated close failure on {}",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(behavior: MockBehavior) -> MockCamera {
        MockCamera::new(
            "cam",
            behavior,
            Arc::new(MockProbe::default()),
            Arc::new(ConcurrencyTracker::default()),
            3,
            8,
            6,
        )
    }

    #[tokio::test]
    async fn test_capture_requires_initialize() {
        let mut cam = camera(MockBehavior::new());
        let err = cam.capture().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);

        assert!(cam.initialize().await.unwrap());
        let frame = cam.capture().await.unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        assert_eq!(frame.data.len(), frame.expected_len());
    }

    #[tokio::test]
    async fn test_scripted_faults_then_success() {
        let mut cam = camera(
            MockBehavior::new()
                .with_capture_faults([MockFault::NoFrame, MockFault::Error(ErrorKind::Timeout)]),
        );
        cam.initialize().await.unwrap();
        assert!(cam.capture().await.unwrap().is_none());
        assert_eq!(cam.capture().await.unwrap_err().kind(), ErrorKind::Timeout);
        assert!(cam.capture().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_roi_shapes_frame() {
        let mut cam = camera(MockBehavior::new());
        cam.initialize().await.unwrap();
        assert!(cam.set_roi(Roi::new(2, 2, 4, 3)).await.unwrap());
        let frame = cam.capture().await.unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));

        let err = cam.set_roi(Roi::new(6, 0, 4, 3)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam.json");

        let mut cam = camera(MockBehavior::new());
        cam.initialize().await.unwrap();
        cam.set_exposure(1234.0).await.unwrap();
        assert!(cam.export_config(&path).await.unwrap());

        cam.set_exposure(99.0).await.unwrap();
        assert!(cam.import_config(&path).await.unwrap());
        assert_eq!(cam.get_exposure().await.unwrap(), 1234.0);
    }

    #[tokio::test]
    async fn test_factory_unknown_device() {
        let factory = MockFactory::with_device_count("MockBasler", 2);
        let err = factory
            .create("mock_cam_7", &CameraConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(factory.discover(false).await.unwrap().len(), 2);
    }
}
