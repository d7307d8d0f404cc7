//! Consistency tests for RTDB implementations
//!
//! MemoryRtdb and RedisRtdb must behave the same for the operations the
//! telemetry service relies on. Redis tests are ignored by default and require
//! a running Redis instance.
//!
//! Run all tests (including Redis): `cargo test --package scada-rtdb --test consistency_tests -- --ignored`

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use scada_rtdb::{device_metrics_key, MemoryRtdb, Rtdb, DEVICE_METRICS_PATTERN};

const REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Helper to create a unique test key prefix
fn test_key(suffix: &str) -> String {
    format!("test:consistency:{}:{}", uuid::Uuid::new_v4(), suffix)
}

// ============================================================================
// Basic Key-Value Operations
// ============================================================================

#[tokio::test]
async fn test_memory_set_get_del() {
    let rtdb = MemoryRtdb::new();
    rtdb.set("device:1:metrics", Bytes::from("{\"online\":true}"))
        .await
        .unwrap();

    let value = rtdb.get("device:1:metrics").await.unwrap();
    assert_eq!(value, Some(Bytes::from("{\"online\":true}")));
    assert!(rtdb.exists("device:1:metrics").await.unwrap());

    assert!(rtdb.del("device:1:metrics").await.unwrap());
    assert!(!rtdb.del("device:1:metrics").await.unwrap());
    assert_eq!(rtdb.get("device:1:metrics").await.unwrap(), None);
}

#[tokio::test]
async fn test_memory_last_write_wins() {
    let rtdb = MemoryRtdb::new();
    rtdb.set("k", Bytes::from("first")).await.unwrap();
    rtdb.set("k", Bytes::from("second")).await.unwrap();
    assert_eq!(rtdb.get("k").await.unwrap(), Some(Bytes::from("second")));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_set_get_del() {
    use scada_rtdb::RedisRtdb;

    let rtdb = RedisRtdb::new(REDIS_URL).await.unwrap();
    let key = test_key("kv");

    rtdb.set(&key, Bytes::from("value1")).await.unwrap();
    assert_eq!(rtdb.get(&key).await.unwrap(), Some(Bytes::from("value1")));
    assert!(rtdb.exists(&key).await.unwrap());

    assert!(rtdb.del(&key).await.unwrap());
    assert_eq!(rtdb.get(&key).await.unwrap(), None);
}

// ============================================================================
// Key Scanning
// ============================================================================

#[tokio::test]
async fn test_memory_scan_device_snapshots() {
    let rtdb = MemoryRtdb::new();
    for id in [3, 1, 2] {
        rtdb.set(&device_metrics_key(id), Bytes::from("{}"))
            .await
            .unwrap();
    }
    rtdb.set("poller:state", Bytes::from("x")).await.unwrap();

    let keys = rtdb.scan_match(DEVICE_METRICS_PATTERN).await.unwrap();
    assert_eq!(
        keys,
        vec!["device:1:metrics", "device:2:metrics", "device:3:metrics"]
    );
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_scan_match() {
    use scada_rtdb::RedisRtdb;

    let rtdb = RedisRtdb::new(REDIS_URL).await.unwrap();
    let prefix = test_key("scan");
    for i in 0..3 {
        rtdb.set(&format!("{}:{}", prefix, i), Bytes::from("v"))
            .await
            .unwrap();
    }

    let keys = rtdb.scan_match(&format!("{}:*", prefix)).await.unwrap();
    assert_eq!(keys.len(), 3);

    // Cleanup
    for key in keys {
        rtdb.del(&key).await.ok();
    }
}

// ============================================================================
// Pub/Sub
// ============================================================================

#[tokio::test]
async fn test_memory_publish_without_subscribers() {
    let rtdb = MemoryRtdb::new();
    assert_eq!(rtdb.publish("metrics.updates", "{}").await.unwrap(), 0);
}

#[tokio::test]
async fn test_memory_publish_preserves_order() {
    let rtdb = MemoryRtdb::new();
    let mut stream = rtdb.subscribe("metrics.updates").await.unwrap();

    for i in 0..5 {
        let receivers = rtdb
            .publish("metrics.updates", &format!("msg-{}", i))
            .await
            .unwrap();
        assert_eq!(receivers, 1);
    }

    for i in 0..5 {
        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, format!("msg-{}", i));
    }
}

#[tokio::test]
async fn test_memory_channels_are_isolated() {
    let rtdb = MemoryRtdb::new();
    let mut alerts = rtdb.subscribe("maintenance.alerts").await.unwrap();

    rtdb.publish("metrics.updates", "metric").await.unwrap();
    rtdb.publish("maintenance.alerts", "alert").await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(1), alerts.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg, "alert");
}

#[tokio::test]
async fn test_memory_set_and_publish_store_visible_first() {
    let rtdb = MemoryRtdb::new();
    let mut stream = rtdb.subscribe("metrics.updates").await.unwrap();

    rtdb.set_and_publish(
        "device:9:metrics",
        Bytes::from("{\"device_id\":9}"),
        "metrics.updates",
    )
    .await
    .unwrap();

    let msg = stream.next().await.unwrap();
    assert_eq!(msg, "{\"device_id\":9}");
    let stored = rtdb.get("device:9:metrics").await.unwrap().unwrap();
    assert_eq!(stored, Bytes::from(msg));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_set_and_publish() {
    use scada_rtdb::RedisRtdb;

    let rtdb = RedisRtdb::new(REDIS_URL).await.unwrap();
    let key = test_key("snapshot");
    let channel = test_key("channel");
    let mut stream = rtdb.subscribe(&channel).await.unwrap();

    let receivers = rtdb
        .set_and_publish(&key, Bytes::from("payload"), &channel)
        .await
        .unwrap();
    assert_eq!(receivers, 1);

    let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg, "payload");
    assert_eq!(rtdb.get(&key).await.unwrap(), Some(Bytes::from("payload")));

    // Cleanup
    rtdb.del(&key).await.ok();
}
