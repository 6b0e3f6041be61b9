//! Primary (Redis) tier and its shared connection handle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::StoreConfig;

/// Bound on a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Durable, shared cache tier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Whether the store can take commands right now.
    fn is_ready(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes `value` with an expiry in one command.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// The process's connection to Redis.
///
/// Build one with [`RedisConnection::connect`] at startup and share the
/// returned `Arc` with every cache. While Redis is unreachable the handle
/// reports not-ready and keeps trying in the background at the configured
/// reconnect interval; once connected, the redis connection manager handles
/// reconnects itself.
pub struct RedisConnection {
    address: String,
    manager: OnceCell<ConnectionManager>,
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("address", &self.address)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl RedisConnection {
    /// Connects to the configured Redis.
    ///
    /// Makes one bounded attempt before returning. If it fails, the handle is
    /// returned anyway and connection attempts continue on a background task.
    /// Only an unusable address is an error. Must be called within a Tokio
    /// runtime.
    pub async fn connect(config: &StoreConfig) -> Result<Arc<Self>> {
        let client = redis::Client::open(config.url()).context("Failed to create Redis client")?;
        let connection = Arc::new(Self {
            address: format!("{}:{}", config.host, config.port),
            manager: OnceCell::new(),
        });

        if !connection.try_connect(&client).await {
            tokio::spawn(reconnect(
                client,
                Arc::downgrade(&connection),
                config.reconnect_interval,
            ));
        }

        Ok(connection)
    }

    async fn try_connect(&self, client: &redis::Client) -> bool {
        match tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client.clone())).await
        {
            Ok(Ok(manager)) => {
                let _ = self.manager.set(manager);
                info!("Connected to Redis at {}", self.address);
                true
            }
            Ok(Err(e)) => {
                warn!("Redis at {} is unavailable: {}", self.address, e);
                false
            }
            Err(_) => {
                warn!(
                    "Timed out connecting to Redis at {} after {}s",
                    self.address,
                    CONNECT_TIMEOUT.as_secs()
                );
                false
            }
        }
    }

    fn manager(&self) -> Result<ConnectionManager> {
        self.manager
            .get()
            .cloned()
            .with_context(|| format!("Redis at {} is not ready", self.address))
    }
}

/// Retries the connection until it succeeds or the handle is dropped.
async fn reconnect(client: redis::Client, handle: Weak<RedisConnection>, interval: Duration) {
    loop {
        debug!("Retrying Redis connection in {}s", interval.as_secs());
        tokio::time::sleep(interval).await;

        let Some(connection) = handle.upgrade() else {
            return;
        };
        if connection.try_connect(&client).await {
            return;
        }
    }
}

#[async_trait]
impl PrimaryStore for RedisConnection {
    fn is_ready(&self) -> bool {
        self.manager.initialized()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager()?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .context("Redis GET failed")?;

        debug!(
            "Redis {} {}",
            if value.is_some() { "HIT" } else { "MISS" },
            key
        );
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager()?;
        let ttl_seconds = ttl.as_secs().max(1);

        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<()>(&mut conn)
            .await
            .context("Redis SET failed")?;

        debug!("Redis SET {} (ttl {}s)", key, ttl_seconds);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> StoreConfig {
        StoreConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            reconnect_interval: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_is_not_ready() {
        let connection = RedisConnection::connect(&unreachable_config()).await.unwrap();
        assert!(!connection.is_ready());
        assert_eq!(connection.name(), "redis");
    }

    #[tokio::test]
    async fn test_commands_fail_while_not_ready() {
        let connection = RedisConnection::connect(&unreachable_config()).await.unwrap();

        let err = connection.get("key").await.unwrap_err();
        assert!(err.to_string().contains("not ready"));

        let err = connection
            .set_ex("key", "value", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not ready"));
    }

    #[tokio::test]
    async fn test_debug_reports_address_and_readiness() {
        let connection = RedisConnection::connect(&unreachable_config()).await.unwrap();
        let debug = format!("{:?}", connection);
        assert!(debug.contains("127.0.0.1:1"));
        assert!(debug.contains("ready: false"));
    }
}
