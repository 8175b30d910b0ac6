//! # Graph Persistence
//!
//! Loads and saves a whole `GraphMap` as one blob.
//!
//! Every store access holds an exclusive lease obtained through the
//! `RetryPolicy`. The lease is released on every exit path, including
//! errors and cancellation. Saves are conditioned on the ETag recorded by
//! the last load or save, so a concurrent writer surfaces as a conflict
//! instead of being overwritten.
//!
//! The map lock is only held while the snapshot bytes are produced and
//! never across an await.

use crate::formats::PersistenceHeader;
use crate::map::GraphMap;
use crate::primitives::FORMAT_VERSION;
use crate::retry::{RetryError, RetryPolicy, cancellable};
use crate::store::{BlobStore, ETag, LeaseId, StoreError};
use crate::types::GraphError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default lease duration for one load or save.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The blob stayed locked through retries and escalation.
    #[error("Blob '{path}' is still locked after {attempts} attempts")]
    Conflict { path: String, attempts: u32 },

    /// The snapshot was written by a different format version.
    #[error("Snapshot version {found} is not supported (expected {expected})")]
    VersionMismatch { found: u8, expected: u8 },

    #[error("Operation cancelled")]
    Cancelled,

    /// The blob exists but does not decode to a valid map.
    #[error("Corrupt snapshot at '{path}': {source}")]
    Corrupt { path: String, source: GraphError },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl From<StoreError> for PersistenceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => Self::Cancelled,
            other => Self::Store(other),
        }
    }
}

/// Lease-protected snapshot storage for one blob path.
pub struct GraphPersistence {
    store: Arc<dyn BlobStore>,
    path: String,
    policy: RetryPolicy,
    lease_duration: Duration,
    etag: Mutex<Option<ETag>>,
}

impl std::fmt::Debug for GraphPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphPersistence")
            .field("path", &self.path)
            .field("policy", &self.policy)
            .field("lease_duration", &self.lease_duration)
            .finish_non_exhaustive()
    }
}

impl GraphPersistence {
    pub fn new(store: Arc<dyn BlobStore>, path: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
            policy: RetryPolicy::default(),
            lease_duration: DEFAULT_LEASE_DURATION,
            etag: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// ETag recorded by the last successful load or save.
    pub async fn etag(&self) -> Option<ETag> {
        *self.etag.lock().await
    }

    // =========================================================================
    // LEASES
    // =========================================================================

    async fn acquire(&self, cancel: &CancellationToken) -> Result<LeaseId, PersistenceError> {
        self.policy
            .run(self.store.as_ref(), &self.path, cancel, || {
                self.store
                    .acquire_lease(&self.path, self.lease_duration, cancel)
            })
            .await
            .map_err(|err| match err {
                RetryError::Exhausted { attempts } => PersistenceError::Conflict {
                    path: self.path.clone(),
                    attempts,
                },
                RetryError::Cancelled => PersistenceError::Cancelled,
                RetryError::Store(store) => store.into(),
            })
    }

    /// Release with a fresh token so a cancelled caller still frees the
    /// lease. Failures are logged; the lease expires on its own.
    async fn release(&self, lease: LeaseId) {
        let token = CancellationToken::new();
        if let Err(e) = self.store.release_lease(&self.path, lease, &token).await {
            warn!(path = %self.path, lease = %lease, error = %e, "failed to release lease");
        }
    }

    /// Acquire, run `op`, release.
    async fn with_lease<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, PersistenceError>
    where
        F: FnOnce(LeaseId) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let lease = self.acquire(cancel).await?;
        let outcome = cancellable(cancel, op(lease)).await;
        self.release(lease).await;
        match outcome {
            Ok(result) => result.map_err(PersistenceError::from),
            Err(_) => Err(PersistenceError::Cancelled),
        }
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Load the map. A missing blob is `Ok(None)`.
    pub async fn load(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<GraphMap>, PersistenceError> {
        let blob = self
            .with_lease(cancel, |_| self.store.get(&self.path, cancel))
            .await?;

        let Some(blob) = blob else {
            info!(path = %self.path, "no snapshot stored");
            *self.etag.lock().await = None;
            return Ok(None);
        };

        let corrupt = |source: GraphError| PersistenceError::Corrupt {
            path: self.path.clone(),
            source,
        };
        let header = PersistenceHeader::from_bytes(&blob.data).map_err(corrupt)?;
        if header.magic == *crate::primitives::MAGIC_BYTES && !header.is_current_version() {
            return Err(PersistenceError::VersionMismatch {
                found: header.version,
                expected: FORMAT_VERSION,
            });
        }
        let map = GraphMap::from_bytes(&blob.data).map_err(corrupt)?;

        info!(
            path = %self.path,
            etag = %blob.etag,
            nodes = map.node_count()?,
            edges = map.edge_count()?,
            "graph loaded"
        );
        *self.etag.lock().await = Some(blob.etag);
        Ok(Some(map))
    }

    /// Load the map, or an empty one when nothing is stored.
    pub async fn load_or_default(
        &self,
        cancel: &CancellationToken,
    ) -> Result<GraphMap, PersistenceError> {
        Ok(self.load(cancel).await?.unwrap_or_default())
    }

    /// Save a snapshot of `map`. Returns the new ETag.
    ///
    /// Fails with `PersistenceError::Store(StoreError::Conflict)` when the
    /// blob changed since the last load or save.
    pub async fn save(
        &self,
        map: &GraphMap,
        cancel: &CancellationToken,
    ) -> Result<ETag, PersistenceError> {
        let bytes = map.to_bytes()?;
        let size = bytes.len();
        let expected = self.etag().await;

        let etag = self
            .with_lease(cancel, |lease| {
                self.store
                    .set(&self.path, bytes, expected, Some(lease), cancel)
            })
            .await?;

        info!(path = %self.path, etag = %etag, bytes = size, "graph saved");
        *self.etag.lock().await = Some(etag);
        Ok(etag)
    }

    /// Remove the stored snapshot. Returns whether one existed.
    pub async fn delete(&self, cancel: &CancellationToken) -> Result<bool, PersistenceError> {
        let existed = self
            .with_lease(cancel, |lease| {
                self.store.delete(&self.path, Some(lease), cancel)
            })
            .await?;
        info!(path = %self.path, existed, "snapshot deleted");
        *self.etag.lock().await = None;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;

    fn persistence() -> (Arc<MemoryBlobStore>, GraphPersistence) {
        let store = Arc::new(MemoryBlobStore::new());
        let persistence = GraphPersistence::new(store.clone(), "graph/test");
        (store, persistence)
    }

    #[tokio::test]
    async fn missing_blob_loads_as_none() {
        let (_, persistence) = persistence();
        let cancel = CancellationToken::new();
        assert!(persistence.load(&cancel).await.expect("load").is_none());
        let map = persistence.load_or_default(&cancel).await.expect("load");
        assert_eq!(map.node_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn save_then_load_restores_map_and_releases_lease() {
        let (store, persistence) = persistence();
        let cancel = CancellationToken::new();
        let map = GraphMap::new();
        map.execute("upsert node key=a; upsert node key=b; add edge fromKey=a, toKey=b;")
            .expect("execute");

        let etag = persistence.save(&map, &cancel).await.expect("save");
        assert_eq!(persistence.etag().await, Some(etag));

        // The lease was released: an unleased write goes through
        store
            .acquire_lease("graph/test", Duration::from_secs(1), &cancel)
            .await
            .expect("lease is free");
        store.break_lease("graph/test", &cancel).await.expect("break");

        let other = GraphPersistence::new(store.clone(), "graph/test");
        let loaded = other.load(&cancel).await.expect("load").expect("present");
        assert_eq!(loaded.nodes().expect("nodes"), map.nodes().expect("nodes"));
        assert_eq!(loaded.edges().expect("edges"), map.edges().expect("edges"));
        assert_eq!(other.etag().await, Some(etag));
    }

    #[tokio::test]
    async fn stale_writer_gets_conflict() {
        let (store, first) = persistence();
        let second = GraphPersistence::new(store, "graph/test");
        let cancel = CancellationToken::new();
        let map = GraphMap::new();

        first.save(&map, &cancel).await.expect("first save");
        second.load(&cancel).await.expect("load");
        map.execute("upsert node key=a;").expect("execute");
        second.save(&map, &cancel).await.expect("second save");

        let err = first.save(&map, &cancel).await.expect_err("stale etag");
        assert!(matches!(
            err,
            PersistenceError::Store(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn corrupt_and_foreign_version_blobs() {
        let (store, persistence) = persistence();
        let cancel = CancellationToken::new();

        store
            .set("graph/test", b"not a snapshot".to_vec(), None, None, &cancel)
            .await
            .expect("set");
        assert!(matches!(
            persistence.load(&cancel).await,
            Err(PersistenceError::Corrupt { .. })
        ));

        let mut bytes = GraphMap::new().to_bytes().expect("encode");
        bytes[4] = FORMAT_VERSION + 1;
        store
            .set("graph/test", bytes, None, None, &cancel)
            .await
            .expect("set");
        assert!(matches!(
            persistence.load(&cancel).await,
            Err(PersistenceError::VersionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn delete_removes_blob() {
        let (_, persistence) = persistence();
        let cancel = CancellationToken::new();
        persistence
            .save(&GraphMap::new(), &cancel)
            .await
            .expect("save");
        assert!(persistence.delete(&cancel).await.expect("delete"));
        assert!(!persistence.delete(&cancel).await.expect("delete"));
        assert_eq!(persistence.etag().await, None);
    }
}
