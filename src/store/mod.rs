//! Shared key-value store used to hold per-client window records.
//!
//! The limiter never caches records in-process; every evaluation reads from
//! and writes back to a [`WindowStore`]. Expiry of idle clients is delegated
//! entirely to the store's per-key TTL.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::InMemoryStore;
pub use self::redis::{RedisStore, DEFAULT_KEY_PREFIX};

/// Errors that can occur while talking to the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The operation did not complete within the configured timeout.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    /// The store could not be reached.
    #[error("store connection failed: {0}")]
    Connection(String),
    /// The store was reachable but rejected the command.
    #[error("store command failed: {0}")]
    Command(String),
}

/// Key-value store with per-key TTL, shared by every limiter instance.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Fetch the raw value for a key, `None` if it is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store a value, replacing any previous one and resetting its TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Store a value only if the current value equals `expected`.
    ///
    /// `expected == None` means the key must be absent. Returns `false`
    /// without writing when the precondition does not hold.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError>;
}
