//! Fleet-wide capture gate.
//!
//! Bounds the number of driver `capture()` calls in flight across every
//! device sharing the gate. A permit covers a single driver call, never a
//! whole retry loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use camhub_core::{CameraError, Result};

/// Counting semaphore sized by `max_concurrent_captures`.
#[derive(Debug)]
pub struct CaptureGate {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
    /// Serializes resizes so concurrent callers cannot interleave
    resize: Mutex<()>,
}

impl CaptureGate {
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(CameraError::Configuration(
                "max_concurrent_captures must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit: AtomicUsize::new(limit),
            resize: Mutex::new(()),
        })
    }

    /// Wait for a capture slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CameraError::Unexpected("Capture gate closed".to_string()))
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    /// Captures currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.limit()
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Change the number of slots.
    ///
    /// Shrinking waits until enough in-flight captures have finished.
    pub async fn set_limit(&self, limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(CameraError::Configuration(
                "max_concurrent_captures must be at least 1".to_string(),
            ));
        }

        let _guard = self.resize.lock().await;
        let current = self.limit();
        if limit > current {
            self.semaphore.add_permits(limit - current);
        } else if limit < current {
            let surplus = (current - limit) as u32;
            let permits = self
                .semaphore
                .clone()
                .acquire_many_owned(surplus)
                .await
                .map_err(|_| CameraError::Unexpected("Capture gate closed".to_string()))?;
            permits.forget();
        }
        self.limit.store(limit, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_limit_rejected() {
        assert!(CaptureGate::new(0).is_err());
    }

    #[tokio::test]
    async fn test_in_flight_accounting() {
        let gate = CaptureGate::new(2).unwrap();
        let first = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 1);
        let _second = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 2);
        drop(first);
        assert_eq!(gate.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_grow_and_shrink() {
        let gate = CaptureGate::new(1).unwrap();
        gate.set_limit(3).await.unwrap();
        assert_eq!(gate.limit(), 3);
        assert_eq!(gate.in_flight(), 0);

        gate.set_limit(1).await.unwrap();
        assert_eq!(gate.limit(), 1);
        let _permit = gate.acquire().await.unwrap();
        assert!(gate.semaphore.try_acquire().is_err());
    }
}
