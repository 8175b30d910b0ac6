//! # Blob Stores
//!
//! The storage contract the persistence adapter writes snapshots through:
//! opaque blobs addressed by path, versioned by ETag and guarded by
//! exclusive, time-bounded leases.
//!
//! Every call takes a `CancellationToken`. A call observed as cancelled
//! returns `StoreError::Cancelled` and leaves the store unchanged.

mod memory;
mod redb_store;

pub use memory::MemoryBlobStore;
pub use redb_store::RedbBlobStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// =============================================================================
// TYPES
// =============================================================================

/// Opaque version tag. Every successful write yields a new, larger value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ETag(pub u64);

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

/// Identifier of an acquired lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl LeaseId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stored bytes with their current ETag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub etag: ETag,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Another holder has an active lease on the path.
    #[error("Blob '{0}' is leased by another holder")]
    Locked(String),

    /// The blob changed since the expected ETag was read.
    #[error("ETag mismatch on '{path}': expected {expected}")]
    Conflict { path: String, expected: ETag },

    /// The presented lease is not the active lease (expired or broken).
    #[error("Lease on '{0}' is no longer held")]
    LeaseMismatch(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store I/O error: {0}")]
    Io(String),
}

// =============================================================================
// CONTRACT
// =============================================================================

/// Path-addressed blob storage with ETags and leases.
///
/// Lease rules shared by every implementation:
/// - `set`/`delete` without a lease fail with `Locked` while any lease is
///   active; with a lease they succeed only if it is the active one
/// - `acquire_lease` fails with `Locked` while another lease is active;
///   a path does not need a blob to be leased
/// - `break_lease` drops the active lease unconditionally
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Current blob at `path`, or `None` if absent.
    async fn get(&self, path: &str, cancel: &CancellationToken)
    -> Result<Option<Blob>, StoreError>;

    /// Write `data`. With `expected` set, fails with `Conflict` unless the
    /// current ETag equals it (an absent blob never matches).
    async fn set(
        &self,
        path: &str,
        data: Vec<u8>,
        expected: Option<ETag>,
        lease: Option<LeaseId>,
        cancel: &CancellationToken,
    ) -> Result<ETag, StoreError>;

    /// Remove the blob. Returns whether one existed.
    async fn delete(
        &self,
        path: &str,
        lease: Option<LeaseId>,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError>;

    async fn acquire_lease(
        &self,
        path: &str,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<LeaseId, StoreError>;

    async fn break_lease(&self, path: &str, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Release `lease`. Releasing a lease that already expired is not an
    /// error; releasing while someone else holds the path is.
    async fn release_lease(
        &self,
        path: &str,
        lease: LeaseId,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;
}

// =============================================================================
// SHARED RULES
// =============================================================================

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

/// Write access given the active lease and the one presented by the caller.
pub(crate) fn check_lease(
    path: &str,
    active: Option<LeaseId>,
    presented: Option<LeaseId>,
) -> Result<(), StoreError> {
    match (active, presented) {
        (None, None) => Ok(()),
        (Some(active), Some(presented)) if active == presented => Ok(()),
        (Some(_), _) => Err(StoreError::Locked(path.to_string())),
        (None, Some(_)) => Err(StoreError::LeaseMismatch(path.to_string())),
    }
}

pub(crate) fn check_etag(
    path: &str,
    current: Option<ETag>,
    expected: Option<ETag>,
) -> Result<(), StoreError> {
    match expected {
        Some(expected) if current != Some(expected) => Err(StoreError::Conflict {
            path: path.to_string(),
            expected,
        }),
        _ => Ok(()),
    }
}

/// Release rule: the active lease must be ours, or there must be none.
pub(crate) fn check_release(
    path: &str,
    active: Option<LeaseId>,
    lease: LeaseId,
) -> Result<(), StoreError> {
    match active {
        Some(active) if active != lease => Err(StoreError::LeaseMismatch(path.to_string())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_rules() {
        let ours = LeaseId::generate();
        let theirs = LeaseId::generate();
        assert!(check_lease("p", None, None).is_ok());
        assert!(check_lease("p", Some(ours), Some(ours)).is_ok());
        assert_eq!(
            check_lease("p", Some(theirs), Some(ours)),
            Err(StoreError::Locked("p".to_string()))
        );
        assert_eq!(
            check_lease("p", Some(theirs), None),
            Err(StoreError::Locked("p".to_string()))
        );
        assert_eq!(
            check_lease("p", None, Some(ours)),
            Err(StoreError::LeaseMismatch("p".to_string()))
        );
    }

    #[test]
    fn etag_rules() {
        assert!(check_etag("p", None, None).is_ok());
        assert!(check_etag("p", Some(ETag(3)), None).is_ok());
        assert!(check_etag("p", Some(ETag(3)), Some(ETag(3))).is_ok());
        assert!(check_etag("p", Some(ETag(4)), Some(ETag(3))).is_err());
        assert!(check_etag("p", None, Some(ETag(3))).is_err());
    }

    #[test]
    fn release_rules() {
        let ours = LeaseId::generate();
        assert!(check_release("p", None, ours).is_ok());
        assert!(check_release("p", Some(ours), ours).is_ok());
        assert!(check_release("p", Some(LeaseId::generate()), ours).is_err());
    }
}
