//! In-process store for single-instance deployments and tests.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use super::{StoreError, WindowStore};

/// Deadline used when `now + ttl` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 3600);

/// A stored value together with its expiry deadline.
#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: &[u8], ttl: Duration, now: Instant) -> Self {
        Self {
            value: value.to_vec(),
            expires_at: now
                .checked_add(ttl)
                .or_else(|| now.checked_add(FAR_FUTURE))
                .unwrap_or(now),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory [`WindowStore`] backed by a sharded concurrent map.
///
/// Expired keys are removed lazily when they are next touched; there is no
/// background sweep. Only processes sharing this instance see the same state,
/// so it does not provide cross-process limits.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before `key` expires, `None` if it is absent or expired.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.expires_at - now)
    }

    /// Number of keys currently held, including ones not yet lazily expired.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl WindowStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(stored) if stored.is_live(now) => return Ok(Some(stored.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            trace!(key = %key, "Evicting expired key");
            self.entries.remove_if(key, |_, stored| !stored.is_live(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl, Instant::now()));
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let matches = if current.is_live(now) {
                    expected == Some(current.value.as_slice())
                } else {
                    expected.is_none()
                };
                if !matches {
                    return Ok(false);
                }
                occupied.insert(StoredValue::new(value, ttl, now));
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(StoredValue::new(value, ttl, now));
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = InMemoryStore::new();
        store.set("client", b"payload", TTL).await.unwrap();

        assert_eq!(store.get("client").await.unwrap(), Some(b"payload".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_expires_after_ttl() {
        let store = InMemoryStore::new();
        store.set("client", b"payload", TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get("client").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("client").await.unwrap(), None);
        assert!(store.is_empty(), "expired key should be evicted on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_refreshes_ttl() {
        let store = InMemoryStore::new();
        store.set("client", b"first", TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        store.set("client", b"second", TTL).await.unwrap();
        assert_eq!(store.ttl("client"), Some(TTL));

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(store.get("client").await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_keeps_value() {
        let store = InMemoryStore::new();
        store
            .set("client", b"payload", Duration::from_secs(u64::MAX))
            .await
            .unwrap();

        assert_eq!(store.get("client").await.unwrap(), Some(b"payload".to_vec()));
        assert!(store.ttl("client").is_some());
    }

    #[tokio::test]
    async fn test_compare_and_set_on_absent_key() {
        let store = InMemoryStore::new();

        assert!(!store.compare_and_set("client", Some(b"x"), b"new", TTL).await.unwrap());
        assert!(store.compare_and_set("client", None, b"new", TTL).await.unwrap());
        assert_eq!(store.get("client").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_compare_and_set_requires_matching_value() {
        let store = InMemoryStore::new();
        store.set("client", b"current", TTL).await.unwrap();

        assert!(!store.compare_and_set("client", None, b"new", TTL).await.unwrap());
        assert!(!store.compare_and_set("client", Some(b"stale"), b"new", TTL).await.unwrap());
        assert_eq!(store.get("client").await.unwrap(), Some(b"current".to_vec()));

        assert!(store.compare_and_set("client", Some(b"current"), b"new", TTL).await.unwrap());
        assert_eq!(store.get("client").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_and_set_treats_expired_as_absent() {
        let store = InMemoryStore::new();
        store.set("client", b"old", TTL).await.unwrap();
        tokio::time::advance(TTL).await;

        assert!(!store.compare_and_set("client", Some(b"old"), b"new", TTL).await.unwrap());
        assert!(store.compare_and_set("client", None, b"new", TTL).await.unwrap());
    }
}
