//! In-process scale store.
//!
//! Holds services in a map and records every write, so callers can
//! assert on exactly what would have been sent to the control plane.
//! Reads and writes can be made to fail or to stall.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::types::{RemoteService, ScaleStore};

#[derive(Default)]
struct Inner {
    services: HashMap<String, RemoteService>,
    writes: Vec<(String, i64)>,
    reads: usize,
    fail_reads: bool,
    fail_writes: bool,
    latency: Duration,
}

/// A [`ScaleStore`] backed by memory.
#[derive(Default)]
pub struct MemoryScaleStore {
    inner: Mutex<Inner>,
}

impl MemoryScaleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a settled service.
    pub fn with_service(self, id: &str, name: &str, scale: i64) -> Self {
        self.put_service(RemoteService::new(id, name, scale));
        self
    }

    /// Delay every read and write by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Insert or replace a service.
    pub fn put_service(&self, service: RemoteService) {
        self.lock().services.insert(service.id.clone(), service);
    }

    /// Mark a service as transitioning (or settled again).
    pub fn set_transitioning(&self, id: &str, transitioning: bool) {
        if let Some(svc) = self.lock().services.get_mut(id) {
            svc.transitioning = if transitioning { "yes" } else { "no" }.to_string();
        }
    }

    /// Make subsequent reads fail.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Make subsequent writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<(String, i64)> {
        self.lock().writes.clone()
    }

    /// Number of reads attempted.
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    /// Current scale of a service.
    pub fn scale_of(&self, id: &str) -> Option<i64> {
        self.lock().services.get(id).map(|s| s.scale)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn stall(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ScaleStore for MemoryScaleStore {
    async fn get_service(&self, id: &str) -> StoreResult<RemoteService> {
        self.stall().await;
        let mut inner = self.lock();
        inner.reads += 1;
        if inner.fail_reads {
            return Err(StoreError::Status {
                status: 503,
                body: "read failure injected".to_string(),
            });
        }
        inner
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn set_scale(&self, id: &str, scale: i64) -> StoreResult<()> {
        self.stall().await;
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(StoreError::Status {
                status: 503,
                body: "write failure injected".to_string(),
            });
        }
        let svc = inner
            .services
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        svc.scale = scale;
        inner.writes.push((id.to_string(), scale));
        Ok(())
    }
}
