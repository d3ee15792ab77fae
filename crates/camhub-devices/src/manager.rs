//! Camera manager - the fleet of active sessions.
//!
//! The manager resolves `Family:device` identities through the
//! [`DriverRegistry`], keeps at most one [`CameraSession`] per identity and
//! runs batch operations across devices as independent tasks. Every capture,
//! single or batch, passes through one shared [`CaptureGate`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use camhub_core::{
    CameraConfig, CameraError, CameraSettings, DeviceIdentity, DeviceRecord, DiscoveredCamera,
    Frame, Result,
};

use crate::gate::CaptureGate;
use crate::hdr::{HdrOptions, HdrOutput};
use crate::registry::{DriverFamily, DriverRegistry, FamilyStatus};
use crate::session::{CameraSession, SessionOptions};

/// Read-only snapshot of the manager state.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerDiagnostics {
    pub max_concurrent_captures: usize,
    pub in_flight_captures: usize,
    pub active_count: usize,
    pub active_cameras: Vec<String>,
    pub retry_count: u32,
    pub families: Vec<FamilyStatus>,
}

/// Fleet manager.
pub struct CameraManager {
    registry: DriverRegistry,
    config: CameraConfig,
    gate: Arc<CaptureGate>,
    active: RwLock<HashMap<String, Arc<CameraSession>>>,
    /// Serializes open and close per identity
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl CameraManager {
    pub fn new(registry: DriverRegistry, config: CameraConfig) -> Result<Self> {
        config.validate()?;
        let gate = Arc::new(CaptureGate::new(config.max_concurrent_captures)?);
        info!(
            families = registry.families().len(),
            max_concurrent_captures = config.max_concurrent_captures,
            "Camera manager created"
        );
        Ok(Self {
            registry,
            config,
            gate,
            active: RwLock::new(HashMap::new()),
            slots: DashMap::new(),
        })
    }

    /// Manager over the built-in registry.
    pub fn with_builtin_registry(config: CameraConfig) -> Result<Self> {
        Self::new(DriverRegistry::builtin(&config), config)
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        self.slots.entry(key.to_string()).or_default().clone()
    }

    /// Drop the slot lock of `key` once no other open or close holds it.
    fn release_slot(&self, key: &str, slot: Arc<Mutex<()>>) {
        drop(slot);
        self.slots.remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
    }

    // ========== Discovery ==========

    /// Identities (`Family:device`) of every attached device.
    ///
    /// With `families` unset every available family is queried, mock families
    /// only when `include_mocks` is set. Named families are queried as given;
    /// unknown or unavailable names contribute nothing.
    pub async fn discover(&self, families: Option<&[&str]>, include_mocks: bool) -> Vec<String> {
        self.query_families(families, include_mocks, false)
            .await
            .into_iter()
            .flat_map(|(family, cameras)| {
                cameras
                    .into_iter()
                    .map(move |camera| format!("{}:{}", family, camera.name))
            })
            .collect()
    }

    /// Like [`CameraManager::discover`], with a full record per device.
    pub async fn discover_detailed(
        &self,
        families: Option<&[&str]>,
        include_mocks: bool,
    ) -> Vec<DeviceRecord> {
        self.query_families(families, include_mocks, true)
            .await
            .into_iter()
            .flat_map(|(family, cameras)| {
                cameras
                    .into_iter()
                    .enumerate()
                    .map(move |(position, camera)| {
                        DeviceRecord::from_discovered(&family, position, camera)
                    })
            })
            .collect()
    }

    fn selected_families(&self, families: Option<&[&str]>, include_mocks: bool) -> Vec<&DriverFamily> {
        match families {
            Some(names) => names
                .iter()
                .filter_map(|name| {
                    let family = self.registry.get(name);
                    if family.is_none() {
                        debug!(family = %name, "Unknown driver family");
                    }
                    family
                })
                .collect(),
            None => self
                .registry
                .families()
                .iter()
                .filter(|family| include_mocks || !family.is_mock())
                .collect(),
        }
    }

    async fn query_families(
        &self,
        families: Option<&[&str]>,
        include_mocks: bool,
        details: bool,
    ) -> Vec<(String, Vec<DiscoveredCamera>)> {
        let queries = self
            .selected_families(families, include_mocks)
            .into_iter()
            .filter_map(|family| match family.factory() {
                Some(factory) => Some(async move {
                    let found = match factory.discover(details).await {
                        Ok(cameras) => cameras,
                        Err(e) => {
                            warn!(family = %family.name, "Discovery failed: {}", e);
                            Vec::new()
                        }
                    };
                    (family.name.clone(), found)
                }),
                None => {
                    debug!(family = %family.name, "Driver family unavailable, skipping");
                    None
                }
            });

        let results = join_all(queries).await;
        let total: usize = results.iter().map(|(_, cameras)| cameras.len()).sum();
        debug!(devices = total, "Discovery finished");
        results
    }

    // ========== Lifecycle ==========

    /// Open `identity` (`Family:device`).
    ///
    /// Idempotent: an active identity returns its existing session without
    /// touching the driver. A failed open never enters the active set.
    pub async fn open(&self, identity: &str) -> Result<Arc<CameraSession>> {
        let identity: DeviceIdentity = identity.parse()?;
        let key = identity.to_string();

        if let Some(session) = self.active.read().await.get(&key) {
            return Ok(Arc::clone(session));
        }

        let slot = self.slot(&key);
        let result = {
            let _guard = slot.lock().await;
            self.open_locked(identity, &key).await
        };
        self.release_slot(&key, slot);
        result
    }

    async fn open_locked(&self, identity: DeviceIdentity, key: &str) -> Result<Arc<CameraSession>> {
        if let Some(session) = self.active.read().await.get(key) {
            return Ok(Arc::clone(session));
        }

        let family = self.registry.get(&identity.family).ok_or_else(|| {
            CameraError::NotFound(format!("Unknown driver family '{}'", identity.family))
        })?;
        let factory = family.factory().ok_or_else(|| {
            CameraError::NotFound(format!(
                "Driver family '{}' is not available on this system",
                identity.family
            ))
        })?;

        let driver = factory.create(&identity.device, &self.config)?;
        let session = CameraSession::open(
            identity,
            driver,
            Arc::clone(&self.gate),
            SessionOptions::from(&self.config),
        )
        .await?;

        let session = Arc::new(session);
        self.active
            .write()
            .await
            .insert(key.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// Open the first device of the configured default family.
    pub async fn open_default(&self) -> Result<Arc<CameraSession>> {
        let family = self.config.default_family.as_str();
        let found = self.discover(Some(&[family][..]), true).await;
        match found.first() {
            Some(identity) => self.open(identity).await,
            None => Err(CameraError::NotFound(format!(
                "No devices found in default family '{}'",
                family
            ))),
        }
    }

    /// Open several identities concurrently, returning those that succeeded.
    pub async fn open_many(
        &self,
        identities: &[impl AsRef<str>],
    ) -> HashMap<String, Arc<CameraSession>> {
        let opens = identities.iter().map(|identity| async move {
            let identity = identity.as_ref();
            (identity.to_string(), self.open(identity).await)
        });

        let mut opened = HashMap::new();
        for (identity, result) in join_all(opens).await {
            match result {
                Ok(session) => {
                    opened.insert(identity, session);
                }
                Err(e) => error!(camera = %identity, kind = %e.kind(), "Failed to open camera: {}", e),
            }
        }
        opened
    }

    /// Close `identity`. Unknown and malformed identities are ignored.
    ///
    /// The entry leaves the active set whether or not the driver closed
    /// cleanly; a driver failure is still returned.
    pub async fn close(&self, identity: &str) -> Result<()> {
        let Some(key) = active_key(identity) else {
            debug!(camera = %identity, "Close requested for malformed identity");
            return Ok(());
        };
        if !self.active.read().await.contains_key(&key) {
            debug!(camera = %key, "Close requested for inactive camera");
            return Ok(());
        }

        let slot = self.slot(&key);
        let result = {
            let _guard = slot.lock().await;
            self.close_locked(&key).await
        };
        self.release_slot(&key, slot);
        result
    }

    async fn close_locked(&self, key: &str) -> Result<()> {
        let session = self.active.read().await.get(key).cloned();
        let Some(session) = session else {
            return Ok(());
        };

        let result = session.close().await;
        self.active.write().await.remove(key);
        result
    }

    /// Close several identities, logging failures.
    pub async fn close_many(&self, identities: &[impl AsRef<str>]) {
        let closes = identities.iter().map(|identity| async move {
            let identity = identity.as_ref();
            if let Err(e) = self.close(identity).await {
                warn!(camera = %identity, "Camera close failed: {}", e);
            }
        });
        join_all(closes).await;
    }

    /// Close every active session.
    pub async fn close_all(&self) {
        let identities: Vec<String> = self.active.read().await.keys().cloned().collect();
        if identities.is_empty() {
            return;
        }
        info!(count = identities.len(), "Closing all cameras");
        self.close_many(&identities).await;
    }

    pub async fn session(&self, identity: &str) -> Option<Arc<CameraSession>> {
        let key = active_key(identity)?;
        self.active.read().await.get(&key).cloned()
    }

    /// Active identities, sorted.
    pub async fn active_cameras(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_active(&self, identity: &str) -> bool {
        self.session(identity).await.is_some()
    }

    // ========== Batch operations ==========

    /// Apply settings to several cameras concurrently.
    ///
    /// Unknown identities and failed devices map to `false`.
    pub async fn batch_configure(
        &self,
        settings: HashMap<String, CameraSettings>,
    ) -> HashMap<String, bool> {
        let mut tasks = Vec::with_capacity(settings.len());
        for (identity, camera_settings) in settings {
            let handle = self.session(&identity).await.map(|session| {
                tokio::spawn(async move { session.configure(&camera_settings).await })
            });
            tasks.push((identity, handle));
        }

        collect_results(tasks, "configure")
            .await
            .into_iter()
            .map(|(identity, applied)| (identity, applied.unwrap_or(false)))
            .collect()
    }

    /// Capture one frame from several cameras concurrently.
    ///
    /// `save_pattern` may contain `{camera}`, replaced by the identity's file
    /// stem. Unknown identities and failed devices map to `None`.
    pub async fn batch_capture(
        &self,
        identities: &[impl AsRef<str>],
        save_pattern: Option<&str>,
    ) -> HashMap<String, Option<Frame>> {
        let mut tasks = Vec::with_capacity(identities.len());
        for identity in identities {
            let identity = identity.as_ref().to_string();
            let handle = self.session(&identity).await.map(|session| {
                let path = save_pattern
                    .map(|pattern| PathBuf::from(camera_pattern(pattern, session.identity())));
                tokio::spawn(async move { session.capture(path.as_deref()).await })
            });
            tasks.push((identity, handle));
        }
        collect_results(tasks, "capture").await
    }

    /// HDR bracket on several cameras concurrently.
    ///
    /// A save pattern in `options` may contain `{camera}` alongside
    /// `{exposure}` and `{index}`.
    pub async fn batch_capture_hdr(
        &self,
        identities: &[impl AsRef<str>],
        options: &HdrOptions,
    ) -> HashMap<String, Option<HdrOutput>> {
        let mut tasks = Vec::with_capacity(identities.len());
        for identity in identities {
            let identity = identity.as_ref().to_string();
            let handle = self.session(&identity).await.map(|session| {
                let mut options = options.clone();
                options.save_path_pattern = options
                    .save_path_pattern
                    .as_deref()
                    .map(|pattern| camera_pattern(pattern, session.identity()));
                tokio::spawn(async move { session.capture_hdr(&options).await })
            });
            tasks.push((identity, handle));
        }
        collect_results(tasks, "hdr").await
    }

    // ========== Tuning and diagnostics ==========

    /// Resize the fleet-wide capture budget.
    pub async fn set_max_concurrent_captures(&self, limit: usize) -> Result<()> {
        self.gate.set_limit(limit).await?;
        info!(max_concurrent_captures = limit, "Capture budget changed");
        Ok(())
    }

    pub fn max_concurrent_captures(&self) -> usize {
        self.gate.limit()
    }

    pub async fn diagnostics(&self) -> ManagerDiagnostics {
        let active_cameras = self.active_cameras().await;
        ManagerDiagnostics {
            max_concurrent_captures: self.gate.limit(),
            in_flight_captures: self.gate.in_flight(),
            active_count: active_cameras.len(),
            active_cameras,
            retry_count: self.config.retry_count,
            families: self.registry.statuses(),
        }
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        let active = self.active.get_mut();
        if !active.is_empty() {
            let mut cameras: Vec<&String> = active.keys().collect();
            cameras.sort();
            warn!(
                count = cameras.len(),
                ?cameras,
                "Camera manager dropped with open sessions; call close_all() before shutdown"
            );
        }
    }
}

/// Key of `identity` in the active set, normalized the way `open` stores it.
fn active_key(identity: &str) -> Option<String> {
    identity
        .parse::<DeviceIdentity>()
        .ok()
        .map(|identity| identity.to_string())
}

fn camera_pattern(pattern: &str, identity: &DeviceIdentity) -> String {
    pattern.replace("{camera}", &identity.file_stem())
}

/// Await per-camera tasks, turning every failure into `None`.
async fn collect_results<T>(
    tasks: Vec<(String, Option<JoinHandle<Result<T>>>)>,
    operation: &'static str,
) -> HashMap<String, Option<T>> {
    let (identities, handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
    let outcomes = join_all(handles.into_iter().map(|handle| async move {
        match handle {
            Some(handle) => Some(handle.await),
            None => None,
        }
    }))
    .await;

    identities
        .into_iter()
        .zip(outcomes)
        .map(|(identity, outcome)| {
            let value = match outcome {
                None => {
                    warn!(camera = %identity, operation, "Camera is not open");
                    None
                }
                Some(Ok(Ok(value))) => Some(value),
                Some(Ok(Err(e))) => {
                    warn!(camera = %identity, operation, kind = %e.kind(), "Batch operation failed: {}", e);
                    None
                }
                Some(Err(e)) => {
                    error!(camera = %identity, operation, "Batch task aborted: {}", e);
                    None
                }
            };
            (identity, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFactory;
    use camhub_core::DriverKind;

    fn manager() -> CameraManager {
        let mut registry = DriverRegistry::new();
        registry.register(
            "MockFamily",
            DriverKind::Mock,
            Arc::new(MockFactory::new("MockFamily").with_device("dev1")),
        );
        CameraManager::new(registry, CameraConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_slots_released_after_lifecycle() {
        let manager = manager();

        for n in 0..100 {
            manager.close(&format!("MockFamily:gone{}", n)).await.unwrap();
        }
        assert!(manager.open("MockFamily:missing").await.is_err());
        assert!(manager.open("Unknown:dev1").await.is_err());
        assert!(manager.slots.is_empty());

        manager.open("MockFamily:dev1").await.unwrap();
        assert!(manager.slots.is_empty());
        manager.close("MockFamily:dev1").await.unwrap();
        assert!(manager.slots.is_empty());
        assert!(manager.active_cameras().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_opens_release_shared_slot() {
        let manager = manager();

        let opens = (0..8).map(|_| manager.open("MockFamily:dev1"));
        let sessions = join_all(opens).await;

        assert!(sessions.iter().all(|session| session.is_ok()));
        assert!(manager.slots.is_empty());
        manager.close_all().await;
        assert!(manager.slots.is_empty());
    }

    #[test]
    fn test_active_key_normalizes_whitespace() {
        assert_eq!(active_key(" MockFamily : dev1 ").as_deref(), Some("MockFamily:dev1"));
        assert_eq!(active_key("no-separator"), None);
    }
}
