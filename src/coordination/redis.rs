//! Redis-backed coordination store

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::{AsyncCommands, Script};
use std::time::Duration;

use super::{CoordinationResult, CoordinationStore};
use crate::config::RedisConfig;

/// Deletes KEYS[1] only when it still holds ARGV[1]
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Coordination store on a pooled Redis connection
pub struct RedisCoordinator {
    pool: Pool,
    release_script: Script,
}

impl RedisCoordinator {
    /// Connect and verify the server answers `PING`
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let pool_config = PoolConfig::from_url(&config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| anyhow::anyhow!("Failed to create pool builder: {e}"))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .context("Failed to create Redis connection pool")?;

        let mut conn = pool.get().await.context("Failed to get Redis connection")?;

        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to ping Redis")?;

        tracing::info!(url = %config.url, "Connected to Redis");

        Ok(Self {
            pool,
            release_script: Script::new(COMPARE_AND_DELETE),
        })
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let result: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(result == "PONG")
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinator {
    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> CoordinationResult<bool> {
        let mut conn = self.pool.get().await?;

        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut *conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> CoordinationResult<bool> {
        let mut conn = self.pool.get().await?;

        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(value)
            .invoke_async(&mut *conn)
            .await?;

        Ok(deleted == 1)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> CoordinationResult<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zcard(&self, key: &str) -> CoordinationResult<usize> {
        let mut conn = self.pool.get().await?;
        let count: usize = conn.zcard(key).await?;
        Ok(count)
    }

    async fn zscore(&self, key: &str, member: &str) -> CoordinationResult<Option<f64>> {
        let mut conn = self.pool.get().await?;
        let score: Option<f64> = conn.zscore(key, member).await?;
        Ok(score)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> CoordinationResult<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let members: Vec<String> = conn.zrange(key, start, stop).await?;
        Ok(members)
    }

    async fn zrem(&self, key: &str, member: &str) -> CoordinationResult<bool> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            pool_size: 4,
        }
    }

    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_set_nx_px_is_exclusive() {
        let store = RedisCoordinator::new(&test_config()).await.unwrap();
        let key = format!("harvester:test:lock:{}", uuid::Uuid::new_v4());

        assert!(store.set_nx_px(&key, "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_nx_px(&key, "b", Duration::from_secs(5)).await.unwrap());

        assert!(!store.compare_and_delete(&key, "b").await.unwrap());
        assert!(store.compare_and_delete(&key, "a").await.unwrap());
        assert!(store.set_nx_px(&key, "b", Duration::from_secs(5)).await.unwrap());
        assert!(store.compare_and_delete(&key, "b").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_ranked_set_commands() {
        let store = RedisCoordinator::new(&test_config()).await.unwrap();
        let key = format!("harvester:test:zset:{}", uuid::Uuid::new_v4());

        store.zadd(&key, "t1", 10.0).await.unwrap();
        store.zadd(&key, "t2", 20.0).await.unwrap();
        assert_eq!(store.zcard(&key).await.unwrap(), 2);
        assert_eq!(store.zscore(&key, "t2").await.unwrap(), Some(20.0));
        assert_eq!(store.zrange(&key, 0, -1).await.unwrap(), vec!["t1", "t2"]);

        assert!(store.zrem(&key, "t1").await.unwrap());
        assert!(store.zrem(&key, "t2").await.unwrap());
        assert_eq!(store.zcard(&key).await.unwrap(), 0);
    }
}
