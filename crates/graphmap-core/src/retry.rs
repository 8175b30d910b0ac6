//! # Lease Retry Policy
//!
//! Contention on a leased blob is resolved in three phases:
//! 1. a first attempt plus up to `max_attempts` retries on `Locked`, with
//!    exponential backoff (`initial_backoff`, doubled, capped at
//!    `max_backoff`)
//! 2. one escalation: `break_lease` on the path
//! 3. exactly one final attempt; `Locked` again means `Exhausted`
//!
//! Any other store error is returned immediately. Every await is raced
//! against the cancellation token.

use crate::store::{BlobStore, StoreError};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// Still locked after retries, escalation and the final attempt.
    #[error("still locked after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RetryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => Self::Cancelled,
            other => Self::Store(other),
        }
    }
}

/// Await `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, RetryError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RetryError::Cancelled),
        out = fut => Ok(out),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt before escalating.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_backoff)
    }

    /// Run `op` under the policy. `store` and `path` are used for the
    /// escalation step only.
    pub async fn run<T, F, Fut>(
        &self,
        store: &dyn BlobStore,
        path: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        for retry in 0..=self.max_attempts {
            match cancellable(cancel, op()).await? {
                Ok(value) => return Ok(value),
                Err(StoreError::Locked(_)) => {
                    debug!(path, attempt = retry + 1, "blob locked");
                    if retry < self.max_attempts {
                        cancellable(cancel, tokio::time::sleep(self.backoff(retry))).await?;
                    }
                }
                Err(other) => return Err(other.into()),
            }
        }

        warn!(
            path,
            attempts = self.max_attempts + 1,
            "lease still held after retries, breaking it"
        );
        cancellable(cancel, store.break_lease(path, cancel)).await??;

        match cancellable(cancel, op()).await? {
            Ok(value) => Ok(value),
            Err(StoreError::Locked(_)) => Err(RetryError::Exhausted {
                attempts: self.max_attempts + 2,
            }),
            Err(other) => Err(other.into()),
        }
    }
}
