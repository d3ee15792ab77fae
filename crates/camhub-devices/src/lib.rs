//! Camera Orchestration Crate
//!
//! This crate turns individual camera drivers into a managed fleet.
//!
//! ## Architecture
//!
//! - **DriverRegistry**: Driver families mapped to their factories, built once
//! - **CameraSession**: One driver behind an exclusive device lock, with
//!   retrying capture, configure and HDR bracketing
//! - **CameraManager**: Active sessions by identity, discovery and concurrent
//!   batch operations
//! - **CaptureGate**: Fleet-wide bound on in-flight driver captures
//!
//! Vendor drivers implement [`camhub_core::CameraDriver`] and are registered
//! through a [`DriverFactory`]. The `mock` module provides simulated devices.

pub mod frame_io;
pub mod gate;
pub mod hdr;
pub mod manager;
pub mod mock;
pub mod registry;
pub mod retry;
pub mod session;

pub use gate::CaptureGate;
pub use hdr::{HdrFrame, HdrOptions, HdrOutput, MAX_HDR_LEVELS, exposure_ladder};
pub use manager::{CameraManager, ManagerDiagnostics};
pub use mock::{ConcurrencyTracker, MockBehavior, MockCamera, MockFactory, MockFault, MockProbe};
pub use registry::{DriverFactory, DriverFamily, DriverRegistry, FamilyStatus};
pub use retry::{AttemptOutcome, backoff_delay};
pub use session::{CameraSession, SessionOptions};
