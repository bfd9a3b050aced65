use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};

use crate::store::KeyValueStore;

/// Redis-backed store. Reads may be served by a replica, writes always hit the primary.
#[derive(Clone)]
pub struct RedisStore {
    writer: ConnectionManager,
    reader: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str, read_url: Option<&str>) -> Result<Self> {
        let writer = connect(url).await?;
        tracing::info!(url, "Connected to cache primary");
        let reader = match read_url {
            Some(read_url) => {
                let reader = connect(read_url).await?;
                tracing::info!(url = read_url, "Connected to cache replica");
                reader
            }
            None => writer.clone(),
        };
        Ok(Self { writer, reader })
    }
}

async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = Client::open(url).with_context(|| format!("Invalid cache URL {url}"))?;
    ConnectionManager::new(client).await.with_context(|| format!("Failed to connect to {url}"))
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.reader.clone();
        conn.get(key).await.with_context(|| format!("GET {key}"))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.writer.clone();
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .with_context(|| format!("SETEX {key}")),
            None => conn.set::<_, _, ()>(key, value).await.with_context(|| format!("SET {key}")),
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.writer.clone();
        conn.del::<_, ()>(keys).await.with_context(|| format!("DEL {}", keys.join(" ")))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.writer.clone();
        conn.expire::<_, ()>(key, ttl.as_secs().max(1) as i64)
            .await
            .with_context(|| format!("EXPIRE {key}"))
    }
}
