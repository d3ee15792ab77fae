//! Core traits and types for camhub.
//!
//! This crate defines the vocabulary shared by the orchestration layer and the
//! drivers plugged into it: the error taxonomy, configuration, the camera
//! capability contract and device identities.

pub mod config;
pub mod driver;
pub mod error;
pub mod identity;

pub use config::CameraConfig;
pub use driver::{
    CameraDriver, CameraSettings, ColorOrder, DeviceRecord, DiscoveredCamera, Frame, Roi,
    TriggerMode, ValueRange, WhiteBalanceMode,
};
pub use error::{CameraError, ErrorKind, Result};
pub use identity::{DeviceIdentity, DriverKind};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{CameraConfig, defaults, env_vars};
    pub use crate::driver::{
        CameraDriver, CameraSettings, ColorOrder, Frame, Roi, TriggerMode, ValueRange,
        WhiteBalanceMode,
    };
    pub use crate::error::{CameraError, ErrorKind, Result};
    pub use crate::identity::{DeviceIdentity, DriverKind};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
