//! # redb-backed Blob Store
//!
//! Durable blob storage in a single redb file. Blobs, ETags and leases
//! live in separate tables and every operation is one redb transaction,
//! so a write and its lease check commit together or not at all.
//!
//! redb is synchronous; each call runs on the blocking pool. The
//! cancellation token is checked again right before commit and a
//! cancelled write aborts its transaction.

use super::{
    Blob, BlobStore, ETag, LeaseId, StoreError, check_cancelled, check_etag, check_lease,
    check_release,
};
use async_trait::async_trait;
use redb::{
    Database, ReadableDatabase, ReadableTable, Table, TableDefinition, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

/// Table for blobs: path -> bytes
const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

/// Table for versions: path -> etag
const ETAGS: TableDefinition<&str, u64> = TableDefinition::new("etags");

/// Table for leases: path -> postcard `LeaseRecord`
const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");

/// Table for store metadata: key -> value
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const LAST_ETAG_KEY: &str = "last_etag";

#[derive(Debug, Serialize, Deserialize)]
struct LeaseRecord {
    id: LeaseId,
    /// Wall-clock expiry, milliseconds since the Unix epoch.
    expires_at_ms: u64,
}

fn io_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Io(e.to_string())
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(millis)
        .unwrap_or(0)
}

fn active_lease(
    leases: &Table<'_, &'static str, &'static [u8]>,
    path: &str,
) -> Result<Option<LeaseId>, StoreError> {
    let Some(bytes) = leases.get(path).map_err(io_err)?.map(|v| v.value().to_vec()) else {
        return Ok(None);
    };
    let record: LeaseRecord = postcard::from_bytes(&bytes).map_err(io_err)?;
    if record.expires_at_ms > now_ms() {
        Ok(Some(record.id))
    } else {
        Ok(None)
    }
}

fn next_etag(txn: &WriteTransaction) -> Result<ETag, StoreError> {
    let mut meta = txn.open_table(METADATA).map_err(io_err)?;
    let next = meta
        .get(LAST_ETAG_KEY)
        .map_err(io_err)?
        .map(|v| v.value())
        .unwrap_or(0)
        + 1;
    meta.insert(LAST_ETAG_KEY, next).map_err(io_err)?;
    Ok(ETag(next))
}

/// Commit unless cancellation was requested while the transaction ran.
fn commit(txn: WriteTransaction, cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        txn.abort().map_err(io_err)?;
        return Err(StoreError::Cancelled);
    }
    txn.commit().map_err(io_err)
}

/// Blob store persisted in a redb database file.
pub struct RedbBlobStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBlobStore").finish_non_exhaustive()
    }
}

impl RedbBlobStore {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Create tables up front so read transactions can always open them
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(BLOBS).map_err(io_err)?;
            let _ = write_txn.open_table(ETAGS).map_err(io_err)?;
            let _ = write_txn.open_table(LEASES).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self { db: Arc::new(db) })
    }

    /// Run `op` on the blocking pool.
    async fn run<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Database, &CancellationToken) -> Result<T, StoreError> + Send + 'static,
    {
        check_cancelled(cancel)?;
        let db = Arc::clone(&self.db);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || op(&db, &cancel))
            .await
            .map_err(io_err)?
    }
}

#[async_trait]
impl BlobStore for RedbBlobStore {
    async fn get(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Blob>, StoreError> {
        let path = path.to_string();
        self.run(cancel, move |db, _| {
            let read_txn = db.begin_read().map_err(io_err)?;
            let blobs = read_txn.open_table(BLOBS).map_err(io_err)?;
            let Some(data) = blobs
                .get(path.as_str())
                .map_err(io_err)?
                .map(|v| v.value().to_vec())
            else {
                return Ok(None);
            };
            let etags = read_txn.open_table(ETAGS).map_err(io_err)?;
            let etag = etags
                .get(path.as_str())
                .map_err(io_err)?
                .map(|v| ETag(v.value()))
                .ok_or_else(|| StoreError::Io(format!("blob '{}' has no etag", path)))?;
            Ok(Some(Blob { data, etag }))
        })
        .await
    }

    async fn set(
        &self,
        path: &str,
        data: Vec<u8>,
        expected: Option<ETag>,
        lease: Option<LeaseId>,
        cancel: &CancellationToken,
    ) -> Result<ETag, StoreError> {
        let path = path.to_string();
        self.run(cancel, move |db, cancel| {
            let txn = db.begin_write().map_err(io_err)?;
            let etag = {
                let leases = txn.open_table(LEASES).map_err(io_err)?;
                check_lease(&path, active_lease(&leases, &path)?, lease)?;

                let mut etags = txn.open_table(ETAGS).map_err(io_err)?;
                let current = etags
                    .get(path.as_str())
                    .map_err(io_err)?
                    .map(|v| ETag(v.value()));
                check_etag(&path, current, expected)?;

                let etag = next_etag(&txn)?;
                etags.insert(path.as_str(), etag.0).map_err(io_err)?;
                let mut blobs = txn.open_table(BLOBS).map_err(io_err)?;
                blobs
                    .insert(path.as_str(), data.as_slice())
                    .map_err(io_err)?;
                etag
            };
            commit(txn, cancel)?;
            Ok(etag)
        })
        .await
    }

    async fn delete(
        &self,
        path: &str,
        lease: Option<LeaseId>,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        let path = path.to_string();
        self.run(cancel, move |db, cancel| {
            let txn = db.begin_write().map_err(io_err)?;
            let existed = {
                let leases = txn.open_table(LEASES).map_err(io_err)?;
                check_lease(&path, active_lease(&leases, &path)?, lease)?;

                let mut blobs = txn.open_table(BLOBS).map_err(io_err)?;
                let existed = blobs.remove(path.as_str()).map_err(io_err)?.is_some();
                let mut etags = txn.open_table(ETAGS).map_err(io_err)?;
                etags.remove(path.as_str()).map_err(io_err)?;
                existed
            };
            commit(txn, cancel)?;
            Ok(existed)
        })
        .await
    }

    async fn acquire_lease(
        &self,
        path: &str,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<LeaseId, StoreError> {
        let path = path.to_string();
        self.run(cancel, move |db, cancel| {
            let txn = db.begin_write().map_err(io_err)?;
            let id = {
                let mut leases = txn.open_table(LEASES).map_err(io_err)?;
                if active_lease(&leases, &path)?.is_some() {
                    return Err(StoreError::Locked(path));
                }
                let record = LeaseRecord {
                    id: LeaseId::generate(),
                    expires_at_ms: now_ms().saturating_add(millis(duration)),
                };
                let bytes = postcard::to_stdvec(&record).map_err(io_err)?;
                leases
                    .insert(path.as_str(), bytes.as_slice())
                    .map_err(io_err)?;
                record.id
            };
            commit(txn, cancel)?;
            Ok(id)
        })
        .await
    }

    async fn break_lease(&self, path: &str, cancel: &CancellationToken) -> Result<(), StoreError> {
        let path = path.to_string();
        self.run(cancel, move |db, cancel| {
            let txn = db.begin_write().map_err(io_err)?;
            {
                let mut leases = txn.open_table(LEASES).map_err(io_err)?;
                leases.remove(path.as_str()).map_err(io_err)?;
            }
            commit(txn, cancel)
        })
        .await
    }

    async fn release_lease(
        &self,
        path: &str,
        lease: LeaseId,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let path = path.to_string();
        self.run(cancel, move |db, cancel| {
            let txn = db.begin_write().map_err(io_err)?;
            {
                let mut leases = txn.open_table(LEASES).map_err(io_err)?;
                check_release(&path, active_lease(&leases, &path)?, lease)?;
                leases.remove(path.as_str()).map_err(io_err)?;
            }
            commit(txn, cancel)
        })
        .await
    }
}

// =============================================================================
// TESTS
// =============================================================================
