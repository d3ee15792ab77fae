//! Camera session - one driver instance behind an exclusive device lock.
//!
//! Every operation on a session takes the device lock, so a capture can never
//! interleave with a configure or an HDR bracket on the same camera. The
//! session provides:
//! - capture with classified retry and backoff
//! - atomic multi-setting configure
//! - HDR bracketing that always restores the original exposure
//! - fail-fast behaviour once closed

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use camhub_core::{
    CameraConfig, CameraDriver, CameraError, CameraSettings, DeviceIdentity, Frame, Result, Roi,
    TriggerMode, ValueRange, WhiteBalanceMode,
};

use crate::frame_io::save_frame;
use crate::gate::CaptureGate;
use crate::hdr::{HdrFrame, HdrOptions, HdrOutput, expand_pattern, exposure_ladder};
use crate::retry::{AttemptOutcome, backoff_delay};

/// Timing knobs of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Deadline for one driver capture
    pub capture_timeout: Duration,
    /// Wait after each HDR exposure change
    pub hdr_settle: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&CameraConfig::default())
    }
}

impl From<&CameraConfig> for SessionOptions {
    fn from(config: &CameraConfig) -> Self {
        Self {
            capture_timeout: config.capture_timeout(),
            hdr_settle: config.hdr_settle(),
        }
    }
}

type DriverGuard<'a> = MutexGuard<'a, Box<dyn CameraDriver>>;

/// An opened camera.
pub struct CameraSession {
    identity: DeviceIdentity,
    driver: Mutex<Box<dyn CameraDriver>>,
    gate: Arc<CaptureGate>,
    retry_count: u32,
    options: SessionOptions,
    closed: AtomicBool,
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("identity", &self.identity)
            .field("retry_count", &self.retry_count)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CameraSession {
    /// Initialize `driver` and verify its connection.
    ///
    /// On failure the driver is closed before the error is returned.
    pub async fn open(
        identity: DeviceIdentity,
        mut driver: Box<dyn CameraDriver>,
        gate: Arc<CaptureGate>,
        options: SessionOptions,
    ) -> Result<Self> {
        debug!(camera = %identity, "Initializing camera");

        match driver.initialize().await {
            Ok(true) => {}
            Ok(false) => {
                close_quietly(&identity, driver.as_mut()).await;
                return Err(CameraError::Initialization(format!(
                    "Camera '{}' refused initialization",
                    identity
                )));
            }
            Err(e) => {
                close_quietly(&identity, driver.as_mut()).await;
                return Err(e);
            }
        }

        match driver.check_connection().await {
            Ok(true) => {}
            Ok(false) => {
                close_quietly(&identity, driver.as_mut()).await;
                return Err(CameraError::Connection(format!(
                    "Camera '{}' failed its connection test",
                    identity
                )));
            }
            Err(e) => {
                close_quietly(&identity, driver.as_mut()).await;
                return Err(e);
            }
        }

        let retry_count = driver.retry_count().max(1);
        info!(camera = %identity, retry_count, "Camera opened");

        Ok(Self {
            identity,
            driver: Mutex::new(driver),
            gate,
            retry_count,
            options,
            closed: AtomicBool::new(false),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// `Family:device` string of this session.
    pub fn name(&self) -> String {
        self.identity.to_string()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CameraError::Connection(format!(
                "Camera '{}' is closed",
                self.identity
            )));
        }
        Ok(())
    }

    /// Take the device lock, failing fast if the session is closed before or
    /// while waiting.
    async fn lock(&self) -> Result<DriverGuard<'_>> {
        self.ensure_open()?;
        let guard = self.driver.lock().await;
        self.ensure_open()?;
        Ok(guard)
    }

    // ========== Capture ==========

    /// Capture one frame, retrying retryable failures with backoff.
    ///
    /// When `save_path` is given the frame is also written there.
    pub async fn capture(&self, save_path: Option<&Path>) -> Result<Frame> {
        let mut guard = self.lock().await?;
        let frame = self.capture_with_retry(&mut **guard).await?;
        drop(guard);

        if let Some(path) = save_path {
            save_frame(&frame, path).await?;
            debug!(camera = %self.identity, path = %path.display(), "Frame saved");
        }
        Ok(frame)
    }

    async fn capture_with_retry(&self, driver: &mut dyn CameraDriver) -> Result<Frame> {
        let attempts = self.retry_count;
        let mut last_error = None;

        for attempt in 0..attempts {
            self.ensure_open()?;

            match self.attempt_capture(driver).await {
                AttemptOutcome::Frame(frame) => {
                    if attempt > 0 {
                        debug!(camera = %self.identity, attempt = attempt + 1, "Capture recovered");
                    }
                    return Ok(frame);
                }
                AttemptOutcome::Fatal(e) => {
                    error!(camera = %self.identity, kind = %e.kind(), "Capture failed: {}", e);
                    return Err(e);
                }
                AttemptOutcome::Retryable(e) => {
                    let kind = e.kind();
                    if attempt + 1 < attempts {
                        let delay = backoff_delay(kind, attempt).unwrap_or_default();
                        warn!(
                            camera = %self.identity,
                            attempt = attempt + 1,
                            attempts,
                            kind = %kind,
                            delay_ms = delay.as_millis() as u64,
                            "Capture attempt failed, retrying: {}",
                            e
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(
                            camera = %self.identity,
                            attempts,
                            kind = %kind,
                            "Capture failed on final attempt: {}",
                            e
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => e.exhausted(attempts),
            None => CameraError::Capture(format!("No capture attempted on '{}'", self.identity)),
        })
    }

    /// One driver capture under a fleet gate permit and the capture deadline.
    async fn attempt_capture(&self, driver: &mut dyn CameraDriver) -> AttemptOutcome {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => return AttemptOutcome::Fatal(e),
        };

        let timeout = self.options.capture_timeout;
        let result = match tokio::time::timeout(timeout, driver.capture()).await {
            Ok(result) => result,
            Err(_) => Err(CameraError::Timeout(format!(
                "Capture on '{}' exceeded {} ms",
                self.identity,
                timeout.as_millis()
            ))),
        };
        AttemptOutcome::classify(result)
    }

    // ========== Configuration ==========

    /// Apply every setting present in `settings`.
    ///
    /// Returns `true` only if the device accepted all of them. Driver errors
    /// propagate immediately.
    pub async fn configure(&self, settings: &CameraSettings) -> Result<bool> {
        let mut guard = self.lock().await?;
        let driver = &mut **guard;
        let mut all_applied = true;

        if let Some(exposure) = settings.exposure {
            all_applied &= self.accepted("exposure", driver.set_exposure(exposure).await?);
        }
        if let Some(gain) = settings.gain {
            all_applied &= self.accepted("gain", driver.set_gain(gain).await?);
        }
        if let Some(roi) = settings.roi {
            all_applied &= self.accepted("roi", driver.set_roi(roi).await?);
        }
        if let Some(mode) = settings.trigger_mode {
            all_applied &= self.accepted("trigger_mode", driver.set_trigger_mode(mode).await?);
        }
        if let Some(format) = settings.pixel_format.as_deref() {
            all_applied &= self.accepted("pixel_format", driver.set_pixel_format(format).await?);
        }
        if let Some(mode) = settings.white_balance {
            all_applied &=
                self.accepted("white_balance", driver.set_auto_white_balance(mode).await?);
        }
        if let Some(enabled) = settings.image_enhancement {
            all_applied &= self.accepted(
                "image_enhancement",
                driver.set_image_quality_enhancement(enabled).await?,
            );
        }

        debug!(camera = %self.identity, all_applied, "Configuration applied");
        Ok(all_applied)
    }

    fn accepted(&self, setting: &str, accepted: bool) -> bool {
        if !accepted {
            warn!(camera = %self.identity, setting, "Device rejected setting");
        }
        accepted
    }

    // ========== HDR ==========

    /// Capture an exposure bracket around the current exposure.
    ///
    /// The bracket runs on its own task: dropping the returned future does not
    /// interrupt it, and the original exposure is restored on every exit path
    /// that reached the device. A failing level is logged and skipped; the
    /// call fails only if no level produced a frame.
    pub async fn capture_hdr(self: &Arc<Self>, options: &HdrOptions) -> Result<HdrOutput> {
        options.validate()?;
        self.ensure_open()?;

        let session = Arc::clone(self);
        let options = options.clone();
        tokio::spawn(async move { session.bracket(&options).await })
            .await
            .map_err(|e| {
                CameraError::Unexpected(format!("HDR task for '{}' failed: {}", self.identity, e))
            })?
    }

    async fn bracket(&self, options: &HdrOptions) -> Result<HdrOutput> {
        let mut guard = self.lock().await?;
        let driver = &mut **guard;

        let original = driver.get_exposure().await?;
        let range = driver.get_exposure_range().await?;
        let ladder = exposure_ladder(original, range, options.levels, options.multiplier)?;
        debug!(camera = %self.identity, original, ?ladder, "Starting HDR bracket");

        let mut frames = Vec::with_capacity(ladder.len());
        for (index, &exposure) in ladder.iter().enumerate() {
            let pattern = options.save_path_pattern.as_deref();
            match self.capture_level(driver, exposure, index, pattern).await {
                Ok(frame) => frames.push(HdrFrame { exposure, frame }),
                Err(e) => {
                    warn!(camera = %self.identity, exposure, "HDR level failed: {}", e);
                }
            }
        }

        match driver.set_exposure(original).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(camera = %self.identity, original, "Device rejected exposure restore")
            }
            Err(e) => warn!(camera = %self.identity, original, "Failed to restore exposure: {}", e),
        }
        drop(guard);

        self.ensure_open()?;
        if frames.is_empty() {
            return Err(CameraError::Capture(format!(
                "HDR capture on '{}' produced no frames ({} levels)",
                self.identity,
                ladder.len()
            )));
        }

        let complete = frames.len() == ladder.len();
        if !complete {
            warn!(
                camera = %self.identity,
                captured = frames.len(),
                levels = ladder.len(),
                "HDR bracket incomplete"
            );
        } else {
            info!(camera = %self.identity, levels = ladder.len(), "HDR bracket captured");
        }

        Ok(if options.return_images {
            HdrOutput::Images(frames)
        } else {
            HdrOutput::Completed(complete)
        })
    }

    async fn capture_level(
        &self,
        driver: &mut dyn CameraDriver,
        exposure: f64,
        index: usize,
        pattern: Option<&str>,
    ) -> Result<Frame> {
        if !driver.set_exposure(exposure).await? {
            return Err(CameraError::Configuration(format!(
                "Device rejected exposure {}",
                exposure
            )));
        }
        tokio::time::sleep(self.options.hdr_settle).await;

        let frame = self.capture_with_retry(driver).await?;
        if let Some(pattern) = pattern {
            let path = expand_pattern(pattern, exposure, index);
            if let Err(e) = save_frame(&frame, Path::new(&path)).await {
                warn!(camera = %self.identity, path = %path, "Failed to save HDR level: {}", e);
            }
        }
        Ok(frame)
    }

    // ========== Device parameters ==========

    pub async fn set_exposure(&self, exposure: f64) -> Result<bool> {
        self.lock().await?.set_exposure(exposure).await
    }

    pub async fn exposure(&self) -> Result<f64> {
        self.lock().await?.get_exposure().await
    }

    pub async fn exposure_range(&self) -> Result<ValueRange> {
        self.lock().await?.get_exposure_range().await
    }

    pub async fn set_gain(&self, gain: f64) -> Result<bool> {
        self.lock().await?.set_gain(gain).await
    }

    pub async fn gain(&self) -> Result<f64> {
        self.lock().await?.get_gain().await
    }

    pub async fn gain_range(&self) -> Result<ValueRange> {
        self.lock().await?.get_gain_range().await
    }

    pub async fn set_roi(&self, roi: Roi) -> Result<bool> {
        self.lock().await?.set_roi(roi).await
    }

    pub async fn roi(&self) -> Result<Roi> {
        self.lock().await?.get_roi().await
    }

    pub async fn reset_roi(&self) -> Result<bool> {
        self.lock().await?.reset_roi().await
    }

    pub async fn set_trigger_mode(&self, mode: TriggerMode) -> Result<bool> {
        self.lock().await?.set_trigger_mode(mode).await
    }

    pub async fn trigger_mode(&self) -> Result<TriggerMode> {
        self.lock().await?.get_trigger_mode().await
    }

    pub async fn set_pixel_format(&self, format: &str) -> Result<bool> {
        self.lock().await?.set_pixel_format(format).await
    }

    pub async fn pixel_format(&self) -> Result<String> {
        self.lock().await?.get_current_pixel_format().await
    }

    pub async fn pixel_format_range(&self) -> Result<Vec<String>> {
        self.lock().await?.get_pixel_format_range().await
    }

    pub async fn set_white_balance(&self, mode: WhiteBalanceMode) -> Result<bool> {
        self.lock().await?.set_auto_white_balance(mode).await
    }

    pub async fn white_balance(&self) -> Result<WhiteBalanceMode> {
        self.lock().await?.get_white_balance().await
    }

    pub async fn white_balance_range(&self) -> Result<Vec<WhiteBalanceMode>> {
        self.lock().await?.get_white_balance_range().await
    }

    pub async fn set_image_enhancement(&self, enabled: bool) -> Result<bool> {
        self.lock().await?.set_image_quality_enhancement(enabled).await
    }

    pub async fn image_enhancement(&self) -> Result<bool> {
        self.lock().await?.get_image_quality_enhancement().await
    }

    /// Write the driver's configuration to `path`, creating its directory.
    pub async fn export_config(&self, path: &Path) -> Result<bool> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        self.lock().await?.export_config(path).await
    }

    pub async fn import_config(&self, path: &Path) -> Result<bool> {
        self.lock().await?.import_config(path).await
    }

    pub async fn check_connection(&self) -> Result<bool> {
        self.lock().await?.check_connection().await
    }

    // ========== Lifecycle ==========

    /// Close the device.
    ///
    /// Marks the session closed first so queued and retrying calls fail fast,
    /// then waits for the in-flight operation to release the lock. Closing an
    /// already closed session is a Connection error.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(CameraError::Connection(format!(
                "Camera '{}' is already closed",
                self.identity
            )));
        }

        let mut driver = self.driver.lock().await;
        let result = driver.close().await;
        match &result {
            Ok(()) => info!(camera = %self.identity, "Camera closed"),
            Err(e) => warn!(camera = %self.identity, "Driver close failed: {}", e),
        }
        result
    }
}

async fn close_quietly(identity: &DeviceIdentity, driver: &mut dyn CameraDriver) {
    if let Err(e) = driver.close().await {
        warn!(camera = %identity, "Failed to release driver after open failure: {}", e);
    }
}
