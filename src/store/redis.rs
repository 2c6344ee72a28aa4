//! Redis-backed store shared by every limiter instance.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tracing::{debug, warn};

use super::{StoreError, WindowStore};

/// Default prefix for every key written by the limiter. An empty prefix
/// stores records under the bare client key.
pub const DEFAULT_KEY_PREFIX: &str = "slidewin:";

/// Replaces the value only when it still equals the one the caller read.
///
/// ARGV[1] is `1` when a previous value is expected (ARGV[2]), `0` when the
/// key must be absent. ARGV[3] is the new value, ARGV[4] the TTL in ms.
const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current ~= ARGV[2] then
        return 0
    end
elseif current then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
return 1
"#;

/// [`WindowStore`] implementation on top of a Redis connection manager.
///
/// Every command is bounded by `timeout`; an elapsed timeout surfaces as
/// [`StoreError::Timeout`] and is never retried here.
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
    timeout: Duration,
    cas_script: Script,
}

impl RedisStore {
    /// Connect to Redis and verify the server answers `PING`.
    pub async fn connect(
        url: &str,
        key_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!(error = %e, "Invalid Redis URL");
            StoreError::Connection(format!("Failed to create Redis client: {e}"))
        })?;

        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
            .map_err(|e| StoreError::Connection(format!("Failed to connect to Redis: {e}")))?;

        let store = Self {
            connection,
            key_prefix: key_prefix.into(),
            timeout,
            cas_script: Script::new(COMPARE_AND_SET),
        };

        let mut conn = store.connection.clone();
        store
            .bounded(redis::cmd("PING").query_async::<String>(&mut conn))
            .await?;

        debug!(url = %url, prefix = %store.key_prefix, "Connected to Redis");
        Ok(store)
    }

    fn storage_key(&self, key: &str) -> String {
        storage_key(&self.key_prefix, key)
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
            .map_err(StoreError::from)
    }
}

fn storage_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Connection(format!("Redis timed out: {err}"))
        } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

#[async_trait]
impl WindowStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection.clone();
        self.bounded(
            redis::cmd("GET")
                .arg(self.storage_key(key))
                .query_async::<Option<Vec<u8>>>(&mut conn),
        )
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.bounded(
            redis::cmd("SET")
                .arg(self.storage_key(key))
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async::<()>(&mut conn),
        )
        .await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.cas_script.key(self.storage_key(key));
        invocation
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(value)
            .arg(ttl_millis(ttl));

        let written: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(written == 1)
    }
}
