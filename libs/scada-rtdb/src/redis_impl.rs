//! Redis implementation of RTDB traits

use crate::traits::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed RTDB implementation
///
/// Commands go through a shared `ConnectionManager`; every subscription opens
/// its own dedicated Pub/Sub connection.
pub struct RedisRtdb {
    client: Client,
    conn: ConnectionManager,
    url: String,
}

impl std::fmt::Debug for RedisRtdb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRtdb")
            .field("url", &self.url)
            .field("conn", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisRtdb {
    /// Create new Redis RTDB from URL
    pub async fn new(url: &str) -> Result<Self> {
        let client = Client::open(url).with_context(|| format!("Invalid Redis URL {}", url))?;

        let conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| anyhow::anyhow!("Redis connection timeout after 5 seconds"))?
            .with_context(|| format!("Failed to connect to Redis at {}", url))?;

        Ok(Self {
            client,
            conn,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Rtdb for RedisRtdb {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value.as_ref()).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let count: u32 = conn.del(key).await?;
        Ok(count > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        {
            let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u32> {
        let mut conn = self.conn.clone();
        let receivers: u32 = conn.publish(channel, message).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("Failed to open Redis pub/sub connection")?;
        pubsub.subscribe(channel).await?;

        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let channel = channel.clone();
            async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!("Dropping non-UTF8 message on {}: {}", channel, e);
                        None
                    },
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn set_and_publish(&self, key: &str, value: Bytes, channel: &str) -> Result<u32> {
        let message = std::str::from_utf8(&value)?;
        let mut conn = self.conn.clone();
        // MULTI/EXEC keeps the SET visible before any subscriber sees the message
        let (receivers,): (u32,) = redis::pipe()
            .atomic()
            .set(key, value.as_ref())
            .ignore()
            .publish(channel, message)
            .query_async(&mut conn)
            .await?;
        Ok(receivers)
    }
}
