//! Driver registry.
//!
//! Maps each family name to its [`DriverKind`], whether the family's SDK is
//! available, and the factory that discovers and constructs its drivers. The
//! registry is built once and handed to the camera manager.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use camhub_core::{CameraConfig, CameraDriver, DiscoveredCamera, DriverKind, Result};

use crate::mock::MockFactory;

/// Discovers and constructs the drivers of one family.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Enumerate attached devices. `details` asks for dimensions and frame
    /// rate where the family can report them.
    async fn discover(&self, details: bool) -> Result<Vec<DiscoveredCamera>>;

    /// Build an uninitialized driver for `device`.
    fn create(&self, device: &str, config: &CameraConfig) -> Result<Box<dyn CameraDriver>>;
}

/// One registered family.
#[derive(Clone)]
pub struct DriverFamily {
    pub name: String,
    pub kind: DriverKind,
    factory: Option<Arc<dyn DriverFactory>>,
}

impl DriverFamily {
    pub fn available(&self) -> bool {
        self.factory.is_some()
    }

    pub fn is_mock(&self) -> bool {
        self.kind.is_mock()
    }

    pub fn factory(&self) -> Option<&Arc<dyn DriverFactory>> {
        self.factory.as_ref()
    }

    pub fn status(&self) -> FamilyStatus {
        FamilyStatus {
            name: self.name.clone(),
            kind: self.kind,
            available: self.available(),
            mock: self.is_mock(),
        }
    }
}

impl std::fmt::Debug for DriverFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverFamily")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("available", &self.available())
            .finish()
    }
}

/// Serializable view of a family for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyStatus {
    pub name: String,
    pub kind: DriverKind,
    pub available: bool,
    pub mock: bool,
}

/// Ordered set of driver families.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    families: Vec<DriverFamily>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the vendor families recorded as unavailable and the two
    /// built-in mock families registered.
    ///
    /// Vendor SDK bindings live outside this crate; they replace the
    /// unavailable entries through [`DriverRegistry::register`].
    pub fn builtin(config: &CameraConfig) -> Self {
        let mut registry = Self::new();
        for kind in [DriverKind::Basler, DriverKind::Daheng, DriverKind::OpenCv] {
            registry.register_unavailable(kind.default_family(), kind);
        }
        for family in ["MockBasler", "MockDaheng"] {
            let factory = MockFactory::with_device_count(family, config.mock_devices)
                .with_frame_size(config.mock_width, config.mock_height);
            registry.register(family, DriverKind::Mock, Arc::new(factory));
        }
        registry
    }

    /// Register a factory-backed family, replacing any family of the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: DriverKind,
        factory: Arc<dyn DriverFactory>,
    ) {
        self.insert(DriverFamily {
            name: name.into(),
            kind,
            factory: Some(factory),
        });
    }

    /// Record a family whose SDK is not present.
    pub fn register_unavailable(&mut self, name: impl Into<String>, kind: DriverKind) {
        self.insert(DriverFamily {
            name: name.into(),
            kind,
            factory: None,
        });
    }

    fn insert(&mut self, family: DriverFamily) {
        match self.families.iter_mut().find(|f| f.name == family.name) {
            Some(existing) => *existing = family,
            None => self.families.push(family),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DriverFamily> {
        self.families.iter().find(|f| f.name == name)
    }

    pub fn families(&self) -> &[DriverFamily] {
        &self.families
    }

    /// Names of families with a factory, in registration order.
    pub fn available_families(&self) -> Vec<String> {
        self.families
            .iter()
            .filter(|f| f.available())
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn statuses(&self) -> Vec<FamilyStatus> {
        self.families.iter().map(DriverFamily::status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = DriverRegistry::builtin(&CameraConfig::default());
        assert!(!registry.get("Basler").unwrap().available());
        assert!(!registry.get("OpenCV").unwrap().available());
        assert!(registry.get("MockBasler").unwrap().available());
        assert!(registry.get("MockDaheng").unwrap().is_mock());
        assert_eq!(registry.available_families(), vec!["MockBasler", "MockDaheng"]);
        assert!(registry.get("Nikon").is_none());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = DriverRegistry::new();
        registry.register_unavailable("Basler", DriverKind::Basler);
        registry.register(
            "Basler",
            DriverKind::Basler,
            Arc::new(MockFactory::with_device_count("Basler", 1)),
        );
        assert_eq!(registry.families().len(), 1);
        assert!(registry.get("Basler").unwrap().available());
    }
}
