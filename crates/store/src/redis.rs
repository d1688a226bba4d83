//! Redis implementation of CacheBackend.

use async_trait::async_trait;
use bytes::Bytes;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, RedisResult, Script};
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;

use llm_cache_core::{traits::CacheBackend, Error, Result, MAX_TTL};

/// Compare-and-delete: remove the lock only while it still holds our token.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Redis persistence for cached values and stampede locks.
///
/// One multiplexed connection is shared by all callers and re-established
/// after I/O failures. Every command is bounded by `timeout`.
pub struct RedisCacheBackend {
    client: Client,
    prefix: String,
    timeout: Duration,
    connection: RwLock<Option<MultiplexedConnection>>,
    release_script: Script,
}

impl RedisCacheBackend {
    /// Create a new Redis backend. The connection is opened lazily.
    pub fn new(url: &str, prefix: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::backend(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            client,
            prefix: prefix.to_string(),
            timeout,
            connection: RwLock::new(None),
            release_script: Script::new(RELEASE_LOCK_SCRIPT),
        })
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut slot = self.connection.write().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(self.timeout, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| Error::backend("Redis connection timed out"))?
            .map_err(|e| Error::backend(format!("Redis connection error: {}", e)))?;
        tracing::debug!(prefix = %self.prefix, "Opened Redis connection");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self) {
        self.connection.write().await.take();
    }

    /// Run one command under the timeout, mapping failures to backend errors.
    async fn bounded<T, F>(&self, op: &str, command: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    self.reset_connection().await;
                }
                Err(Error::backend(format!("Redis {} error: {}", op, e)))
            }
            Err(_) => {
                self.reset_connection().await;
                Err(Error::backend(format!(
                    "Redis {} timed out after {:?}",
                    op, self.timeout
                )))
            }
        }
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        let data: Option<Vec<u8>> = self.bounded("get", conn.get(&key)).await?;
        Ok(data.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        let ttl_ms = (ttl.min(MAX_TTL).as_millis() as u64).max(1);

        // Set with TTL
        let _: () = self
            .bounded("set", conn.pset_ex(&key, value.as_ref(), ttl_ms))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        let removed: i64 = self.bounded("delete", conn.del(&key)).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn try_acquire_lock(&self, lock_key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let key = self.key(lock_key);
        let ttl_ms = (ttl.min(MAX_TTL).as_millis() as u64).max(1);

        // SET key token NX PX ttl replies OK when set, nil when the key exists.
        let reply: Option<String> = self
            .bounded(
                "lock acquire",
                redis::cmd("SET")
                    .arg(&key)
                    .arg(token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn release_lock(&self, lock_key: &str, token: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let key = self.key(lock_key);
        let removed: i64 = self
            .bounded(
                "lock release",
                self.release_script.key(&key).arg(token).invoke_async(&mut conn),
            )
            .await?;
        Ok(removed > 0)
    }

    async fn approximate_len(&self) -> Result<Option<usize>> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}:*", self.prefix);
        let lock_prefix = self.key("lock:");

        let mut cursor: u64 = 0;
        let mut count = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .bounded(
                    "scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(500)
                        .query_async(&mut conn),
                )
                .await?;
            count += keys.iter().filter(|k| !k.starts_with(&lock_prefix)).count();
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(Some(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_rejected() {
        let err = RedisCacheBackend::new("not-a-url", "llmcache", Duration::from_millis(100))
            .err()
            .expect("invalid url");
        assert!(matches!(err, Error::Backend(_)));
    }

    #[test]
    fn test_keys_are_prefixed() {
        let backend =
            RedisCacheBackend::new("redis://127.0.0.1:6379", "llmcache", Duration::from_millis(100))
                .unwrap();
        assert_eq!(backend.key("abc"), "llmcache:abc");
        assert_eq!(backend.key("lock:abc"), "llmcache:lock:abc");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_backend_error() {
        // Port 1 refuses connections; the error must surface as a value, not hang.
        let backend =
            RedisCacheBackend::new("redis://127.0.0.1:1", "llmcache", Duration::from_millis(500))
                .unwrap();
        assert!(matches!(backend.ping().await, Err(Error::Backend(_))));
        assert!(matches!(backend.get("k").await, Err(Error::Backend(_))));
    }
}
