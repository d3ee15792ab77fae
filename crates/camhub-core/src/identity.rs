//! Device identities and driver kinds.

use serde::{Deserialize, Serialize};

use crate::error::{CameraError, Result};

/// Closed set of driver implementations known to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverKind {
    /// Basler pylon cameras
    Basler,
    /// Daheng Galaxy cameras
    Daheng,
    /// Generic capture devices through OpenCV
    OpenCv,
    /// Simulated devices
    Mock,
}

impl DriverKind {
    pub fn is_mock(&self) -> bool {
        matches!(self, Self::Mock)
    }

    /// Family name used in identities for the vendor kinds.
    pub fn default_family(&self) -> &'static str {
        match self {
            Self::Basler => "Basler",
            Self::Daheng => "Daheng",
            Self::OpenCv => "OpenCV",
            Self::Mock => "Mock",
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.default_family())
    }
}

/// `Family:device` address of one camera.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub family: String,
    pub device: String,
}

impl DeviceIdentity {
    pub fn new(family: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            device: device.into(),
        }
    }

    /// Identity with separators replaced so it can be embedded in file names.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.family, self.device).replace([':', '/', '\\'], "_")
    }
}

impl std::str::FromStr for DeviceIdentity {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        let (family, device) = s.split_once(':').ok_or_else(|| {
            CameraError::Configuration(format!(
                "Invalid camera name '{}': expected 'Family:device'",
                s
            ))
        })?;
        let (family, device) = (family.trim(), device.trim());
        if family.is_empty() || device.is_empty() {
            return Err(CameraError::Configuration(format!(
                "Invalid camera name '{}': family and device must be non-empty",
                s
            )));
        }
        Ok(Self::new(family, device))
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.family, self.device)
    }
}
