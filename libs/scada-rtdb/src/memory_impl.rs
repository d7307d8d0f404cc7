//! In-memory RTDB implementation
//!
//! Uses DashMap for the key space and one tokio broadcast channel per
//! pub/sub channel name.

use crate::traits::*;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Per-channel buffer before slow subscribers start lagging
const CHANNEL_CAPACITY: usize = 1024;

/// In-memory RTDB implementation with concurrent access support
#[derive(Clone)]
pub struct MemoryRtdb {
    kv_store: Arc<DashMap<String, Bytes>>,
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
}

impl MemoryRtdb {
    pub fn new() -> Self {
        Self {
            kv_store: Arc::new(DashMap::new()),
            channels: Arc::new(DashMap::new()),
        }
    }

    /// Clear all stored keys (subscriptions stay open)
    pub fn clear(&self) {
        self.kv_store.clear();
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            kv_count: self.kv_store.len(),
            channel_count: self.channels.len(),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryRtdb {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about memory RTDB usage
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub kv_count: usize,
    pub channel_count: usize,
}

/// Translate a Redis-style glob into an anchored regex
fn glob_to_regex(pattern: &str) -> Result<regex::Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Ok(regex::Regex::new(&expr)?)
}

#[async_trait]
impl Rtdb for MemoryRtdb {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.kv_store.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.kv_store.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.kv_store.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.kv_store.contains_key(key))
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let re = glob_to_regex(pattern)?;
        let mut matches: Vec<String> = self
            .kv_store
            .iter()
            .filter(|entry| re.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        matches.sort();
        Ok(matches)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u32> {
        tracing::trace!("MemoryRtdb: PUBLISH {} ({} bytes)", channel, message.len());
        // send() only fails when nobody is subscribed
        match self.sender(channel).send(message.to_string()) {
            Ok(receivers) => Ok(receivers as u32),
            Err(_) => Ok(0),
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let rx = self.sender(channel).subscribe();
        let channel = channel.to_string();
        let stream = futures::stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(message) => return Some((message, rx)),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                "MemoryRtdb: subscriber on {} lagged, {} messages dropped",
                                channel,
                                skipped
                            );
                        },
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
