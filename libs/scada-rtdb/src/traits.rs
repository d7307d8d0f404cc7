//! Trait definitions for RTDB abstraction

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Stream of message payloads received on one channel
pub type MessageStream = BoxStream<'static, String>;

/// Latest-value store plus fire-and-forget pub/sub
///
/// Implementations:
/// - `RedisRtdb`: production Redis backend
/// - `MemoryRtdb`: in-process backend
#[async_trait]
pub trait Rtdb: Send + Sync + 'static {
    // ========== Basic Key-Value Operations ==========

    /// Get value by key
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Set value for key
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Delete key
    async fn del(&self, key: &str) -> Result<bool>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    // ========== Key Scanning Operations ==========

    /// Keys matching a glob pattern (`*` and `?` wildcards)
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>>;

    // ========== Messaging Operations ==========

    /// Publish message to channel
    ///
    /// Returns the number of subscribers that received the message.
    async fn publish(&self, channel: &str, message: &str) -> Result<u32>;

    /// Subscribe to a channel
    ///
    /// The stream yields payloads published after the subscription is
    /// established and ends when the underlying connection is lost.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;

    /// Store `value` under `key`, then publish the same payload on `channel`.
    ///
    /// A subscriber that reacts to the message always finds the new value
    /// already stored.
    async fn set_and_publish(&self, key: &str, value: Bytes, channel: &str) -> Result<u32> {
        let message = std::str::from_utf8(&value)?.to_string();
        self.set(key, value).await?;
        self.publish(channel, &message).await
    }
}
