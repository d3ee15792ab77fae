//! Device capability contract.
//!
//! A driver wraps one vendor SDK handle (or a mock). The orchestration layer
//! only relies on the operations listed in [`CameraDriver`]; how a driver talks
//! to the hardware is its own business.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CameraError, Result};

/// Channel order of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColorOrder {
    Bgr,
    Rgb,
}

/// A captured image: `height × width × 3` bytes, 8 bits per channel.
///
/// The byte layout is declared by the driver through `color_order` and is
/// otherwise carried untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub color_order: ColorOrder,
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    pub fn new(width: u32, height: u32, color_order: ColorOrder, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            color_order,
            data,
            captured_at: Utc::now(),
        }
    }

    /// Expected buffer length for the declared dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * Self::CHANNELS
    }

    pub fn channels(&self) -> usize {
        Self::CHANNELS
    }
}

/// Inclusive numeric range reported by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp `value` into the range. The range must be valid.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

/// Region of interest in sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn full_sensor(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Frame acquisition trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Free-running acquisition
    Continuous,
    /// Software or hardware trigger per frame
    Trigger,
}

impl std::str::FromStr for TriggerMode {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "continuous" => Ok(Self::Continuous),
            "trigger" => Ok(Self::Trigger),
            other => Err(CameraError::Configuration(format!(
                "Unknown trigger mode: {}",
                other
            ))),
        }
    }
}

/// Automatic white balance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhiteBalanceMode {
    Off,
    Once,
    Continuous,
}

impl std::str::FromStr for WhiteBalanceMode {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "once" => Ok(Self::Once),
            "continuous" => Ok(Self::Continuous),
            other => Err(CameraError::Configuration(format!(
                "Unknown white balance mode: {}",
                other
            ))),
        }
    }
}

/// A subset of device settings applied together by `configure`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<Roi>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_mode: Option<TriggerMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_balance: Option<WhiteBalanceMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_enhancement: Option<bool>,
}

impl CameraSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exposure(mut self, exposure: f64) -> Self {
        self.exposure = Some(exposure);
        self
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = Some(gain);
        self
    }

    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    pub fn with_trigger_mode(mut self, mode: TriggerMode) -> Self {
        self.trigger_mode = Some(mode);
        self
    }

    pub fn with_pixel_format(mut self, format: impl Into<String>) -> Self {
        self.pixel_format = Some(format.into());
        self
    }

    pub fn with_white_balance(mut self, mode: WhiteBalanceMode) -> Self {
        self.white_balance = Some(mode);
        self
    }

    pub fn with_image_enhancement(mut self, enabled: bool) -> Self {
        self.image_enhancement = Some(enabled);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Discovery result as reported by a driver family. Fields the family cannot
/// determine are left empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredCamera {
    pub name: String,
    pub index: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
}

impl DiscoveredCamera {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Detailed discovery record with every field populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Full identity, `Family:device`
    pub name: String,
    pub family: String,
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl DeviceRecord {
    pub fn from_discovered(family: &str, position: usize, camera: DiscoveredCamera) -> Self {
        Self {
            name: format!("{}:{}", family, camera.name),
            family: family.to_string(),
            index: camera.index.unwrap_or(position as u32),
            width: camera.width.unwrap_or_default(),
            height: camera.height.unwrap_or_default(),
            fps: camera.fps.unwrap_or_default(),
        }
    }
}

/// Operations a camera driver must expose.
///
/// All methods except [`CameraDriver::retry_count`] may suspend. Boolean
/// results report whether the device accepted the request; errors carry a
/// classified [`CameraError`].
#[async_trait]
pub trait CameraDriver: Send + Sync {
    /// Device name within its family.
    fn name(&self) -> &str;

    /// Capture attempts the orchestration layer should make per call.
    fn retry_count(&self) -> u32;

    /// Open the SDK handle. `Ok(false)` means the device refused.
    async fn initialize(&mut self) -> Result<bool>;

    /// Grab one frame. `Ok(None)` means no frame was available yet.
    async fn capture(&mut self) -> Result<Option<Frame>>;

    async fn set_exposure(&mut self, exposure: f64) -> Result<bool>;
    async fn get_exposure(&mut self) -> Result<f64>;
    async fn get_exposure_range(&mut self) -> Result<ValueRange>;

    async fn set_gain(&mut self, gain: f64) -> Result<bool>;
    async fn get_gain(&mut self) -> Result<f64>;
    async fn get_gain_range(&mut self) -> Result<ValueRange>;

    async fn set_roi(&mut self, roi: Roi) -> Result<bool>;
    async fn get_roi(&mut self) -> Result<Roi>;
    async fn reset_roi(&mut self) -> Result<bool>;

    async fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<bool>;
    async fn get_trigger_mode(&mut self) -> Result<TriggerMode>;

    async fn set_pixel_format(&mut self, format: &str) -> Result<bool>;
    async fn get_current_pixel_format(&mut self) -> Result<String>;
    async fn get_pixel_format_range(&mut self) -> Result<Vec<String>>;

    async fn set_auto_white_balance(&mut self, mode: WhiteBalanceMode) -> Result<bool>;
    async fn get_white_balance(&mut self) -> Result<WhiteBalanceMode>;
    async fn get_white_balance_range(&mut self) -> Result<Vec<WhiteBalanceMode>>;

    async fn set_image_quality_enhancement(&mut self, enabled: bool) -> Result<bool>;
    async fn get_image_quality_enhancement(&mut self) -> Result<bool>;

    /// Persist the device's settings in the driver's own format.
    async fn export_config(&mut self, path: &Path) -> Result<bool>;
    async fn import_config(&mut self, path: &Path) -> Result<bool>;

    async fn check_connection(&mut self) -> Result<bool>;

    /// Release the SDK handle.
    async fn close(&mut self) -> Result<()>;
}
