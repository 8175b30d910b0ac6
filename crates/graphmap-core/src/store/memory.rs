//! In-process blob store with time-bounded leases.

use super::{
    Blob, BlobStore, ETag, LeaseId, StoreError, check_cancelled, check_etag, check_lease,
    check_release,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct MemoryState {
    blobs: HashMap<String, Blob>,
    /// Lease id and expiry; `None` never expires.
    leases: HashMap<String, (LeaseId, Option<Instant>)>,
    last_etag: u64,
}

impl MemoryState {
    /// Active lease on `path`; expired leases are dropped on the way.
    fn active_lease(&mut self, path: &str) -> Option<LeaseId> {
        match self.leases.get(path) {
            Some(&(id, expires_at)) if expires_at.is_none_or(|at| Instant::now() < at) => Some(id),
            Some(_) => {
                self.leases.remove(path);
                None
            }
            None => None,
        }
    }

    fn next_etag(&mut self) -> ETag {
        self.last_etag += 1;
        ETag(self.last_etag)
    }
}

/// Blob store kept in memory. Lease expiry follows tokio time, so paused
/// test clocks control it.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    state: Mutex<MemoryState>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Blob>, StoreError> {
        check_cancelled(cancel)?;
        Ok(self.state.lock().await.blobs.get(path).cloned())
    }

    async fn set(
        &self,
        path: &str,
        data: Vec<u8>,
        expected: Option<ETag>,
        lease: Option<LeaseId>,
        cancel: &CancellationToken,
    ) -> Result<ETag, StoreError> {
        let mut state = self.state.lock().await;
        check_cancelled(cancel)?;
        let active = state.active_lease(path);
        check_lease(path, active, lease)?;
        check_etag(path, state.blobs.get(path).map(|b| b.etag), expected)?;

        let etag = state.next_etag();
        state.blobs.insert(path.to_string(), Blob { data, etag });
        Ok(etag)
    }

    async fn delete(
        &self,
        path: &str,
        lease: Option<LeaseId>,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        check_cancelled(cancel)?;
        let active = state.active_lease(path);
        check_lease(path, active, lease)?;
        Ok(state.blobs.remove(path).is_some())
    }

    async fn acquire_lease(
        &self,
        path: &str,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<LeaseId, StoreError> {
        let mut state = self.state.lock().await;
        check_cancelled(cancel)?;
        if state.active_lease(path).is_some() {
            return Err(StoreError::Locked(path.to_string()));
        }
        let id = LeaseId::generate();
        // A duration past the clock's range holds until released or broken
        let expires_at = Instant::now().checked_add(duration);
        state.leases.insert(path.to_string(), (id, expires_at));
        Ok(id)
    }

    async fn break_lease(&self, path: &str, cancel: &CancellationToken) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        check_cancelled(cancel)?;
        state.leases.remove(path);
        Ok(())
    }

    async fn release_lease(
        &self,
        path: &str,
        lease: LeaseId,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        check_cancelled(cancel)?;
        let active = state.active_lease(path);
        check_release(path, active, lease)?;
        state.leases.remove(path);
        Ok(())
    }
}
