use super::SecondaryStore;
use crate::config::{RedisConfig, SecondaryBackend};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Secondary target stored in Redis, optionally with a TTL.
#[derive(Clone)]
pub struct RedisSecondary {
    conn: ConnectionManager,
    eviction: Duration,
}

impl RedisSecondary {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let url = config.url.trim();
        if url.is_empty() {
            return Err(ProxyError::Config(
                "redis url is required for redis secondary".to_string(),
            ));
        }

        let client = redis::Client::open(url).map_err(|error| {
            ProxyError::Config(format!("redis connection config error: {}", error))
        })?;
        let conn = client.get_connection_manager().await?;

        Ok(Self {
            conn,
            eviction: config.eviction,
        })
    }
}

#[async_trait]
impl SecondaryStore for RedisSecondary {
    fn backend_type(&self) -> SecondaryBackend {
        SecondaryBackend::Redis
    }

    async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        if !self.eviction.is_zero() {
            cmd.arg("EX").arg(self.eviction.as_secs().max(1));
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Bytes> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        value
            .map(Bytes::from)
            .ok_or_else(|| ProxyError::NotFound(hex::encode(key)))
    }
}
