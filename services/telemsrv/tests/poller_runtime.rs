//! Orchestrator tests: polling, hot reload and online/offline transitions

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod support;

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use scada_rtdb::{
    device_metrics_key, MemoryRtdb, MessageStream, Rtdb, METRICS_CHANNEL, RELOAD_CHANNEL,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use telemsrv::config::PollerConfig;
use telemsrv::error::{Result, TelemetryError};
use telemsrv::model::{Device, DeviceClass, MaintenanceTemplate, ProtocolKind, TelemetrySnapshot};
use telemsrv::providers::{ConfigProvider, StaticConfigProvider};
use telemsrv::runtime::{PollPhase, PollStates, PollerOrchestrator, NO_DATA_ERROR};

use support::{closed_port, device, fast_poller_config, generator_registers, RtuSimulator};

struct Harness {
    rtdb: Arc<dyn Rtdb>,
    provider: Arc<StaticConfigProvider>,
    states: PollStates,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl Harness {
    fn start(devices: Vec<Device>) -> Self {
        Self::start_with(Arc::new(MemoryRtdb::new()), devices, &fast_poller_config())
    }

    fn start_with(rtdb: Arc<dyn Rtdb>, devices: Vec<Device>, config: &PollerConfig) -> Self {
        let provider = Arc::new(StaticConfigProvider::new(devices, None));
        let orchestrator = PollerOrchestrator::new(
            provider.clone() as Arc<dyn ConfigProvider>,
            rtdb.clone(),
            config,
        );
        let states = orchestrator.states();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            orchestrator.run(token).await.unwrap();
        });
        Self {
            rtdb,
            provider,
            states,
            shutdown,
            handle,
        }
    }

    async fn snapshot(&self, device_id: i64) -> Option<TelemetrySnapshot> {
        let raw = self.rtdb.get(&device_metrics_key(device_id)).await.unwrap()?;
        Some(serde_json::from_slice(&raw).unwrap())
    }

    /// Publish reload signals until `done` holds
    async fn reload_until<F, Fut>(&self, done: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        let done = &done;
        eventually(|| async move {
            self.rtdb.publish(RELOAD_CHANNEL, "reload").await.unwrap();
            done().await
        })
        .await;
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap();
    }
}

/// Next snapshot of `device_id` announced on the metrics channel
async fn next_snapshot(updates: &mut MessageStream, device_id: i64) -> TelemetrySnapshot {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let message = updates.next().await.unwrap();
            let snapshot: TelemetrySnapshot = serde_json::from_str(&message).unwrap();
            if snapshot.device_id == device_id {
                return snapshot;
            }
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("no snapshot for device {device_id} within 10s"))
}

/// Retry `check` every 50ms for up to 10s
async fn eventually<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not met within 10s");
}

#[tokio::test]
async fn test_poll_publishes_online_snapshot() {
    let sim = RtuSimulator::start(generator_registers()).await;
    let harness = Harness::start(vec![device(
        1,
        DeviceClass::Generator,
        ProtocolKind::RtuOverTcp,
        sim.addr,
    )]);
    let h = &harness;
    let mut updates = harness.rtdb.subscribe(METRICS_CHANNEL).await.unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), updates.next())
        .await
        .unwrap()
        .unwrap();
    let published: TelemetrySnapshot = serde_json::from_str(&message).unwrap();
    assert_eq!(published.device_id, 1);
    assert!(published.online);
    assert_eq!(published.engine_hours(), Some(1250.0));

    // The stored key is written before the announcement
    let stored = harness.snapshot(1).await.unwrap();
    assert!(stored.timestamp >= published.timestamp);

    eventually(|| async move { h.states.get(&1).is_some_and(|s| s.online) }).await;
    harness.stop().await;
}

#[tokio::test]
async fn test_unreachable_device_goes_offline() {
    let addr = closed_port().await;
    let harness = Harness::start(vec![device(
        5,
        DeviceClass::Generator,
        ProtocolKind::FramedTcp,
        addr,
    )]);
    let h = &harness;

    eventually(|| async move {
        h.states
            .get(&5)
            .is_some_and(|s| s.consecutive_failures >= 2 && s.phase == PollPhase::Backoff)
    })
    .await;

    let snapshot = harness.snapshot(5).await.unwrap();
    assert!(!snapshot.online);
    assert!(snapshot.error.is_some());
    assert!(snapshot.fields.is_empty());
    harness.stop().await;
}

#[tokio::test]
async fn test_silent_device_recovers() {
    let sim = RtuSimulator::start(generator_registers()).await;
    sim.set_silent(true);
    let rtdb: Arc<dyn Rtdb> = Arc::new(MemoryRtdb::new());
    let mut updates = rtdb.subscribe(METRICS_CHANNEL).await.unwrap();
    let config = PollerConfig {
        modbus_timeout_ms: 100,
        ..fast_poller_config()
    };
    let harness = Harness::start_with(
        rtdb,
        vec![device(2, DeviceClass::Generator, ProtocolKind::RtuOverTcp, sim.addr)],
        &config,
    );

    let mut sequence = Vec::new();
    while sequence.len() < 2 {
        sequence.push(next_snapshot(&mut updates, 2).await);
    }

    sim.set_silent(false);
    sim.set(270, 1300);
    let mut online_seen = 0;
    while online_seen < 2 {
        let snapshot = next_snapshot(&mut updates, 2).await;
        if snapshot.online {
            online_seen += 1;
        }
        sequence.push(snapshot);
    }

    let first_online = sequence.iter().position(|s| s.online).unwrap();
    assert!(first_online >= 2);
    for offline in &sequence[..first_online] {
        assert!(!offline.online);
        assert_eq!(offline.error.as_deref(), Some(NO_DATA_ERROR));
        assert!(offline.fields.is_empty());
    }
    for online in &sequence[first_online..] {
        assert!(online.online);
        assert!(online.error.is_none());
    }
    let flips = sequence
        .windows(2)
        .filter(|pair| pair[0].online != pair[1].online)
        .count();
    assert_eq!(flips, 1);
    assert_eq!(sequence.last().unwrap().engine_hours(), Some(1300.0));

    harness.stop().await;
}

#[tokio::test]
async fn test_hot_reload_converges_workers() {
    let first = RtuSimulator::start(generator_registers()).await;
    let second = RtuSimulator::start(generator_registers()).await;
    let harness = Harness::start(vec![device(
        1,
        DeviceClass::Generator,
        ProtocolKind::RtuOverTcp,
        first.addr,
    )]);
    let h = &harness;
    eventually(|| async move { h.snapshot(1).await.is_some_and(|s| s.online) }).await;

    // Device 1 moves to another bridge, device 2 appears
    let moved = device(1, DeviceClass::Generator, ProtocolKind::RtuOverTcp, second.addr);
    let endpoint = &moved.endpoint();
    harness.provider.replace_devices(vec![
        moved,
        device(2, DeviceClass::Generator, ProtocolKind::RtuOverTcp, first.addr),
    ]);
    harness
        .reload_until(|| async move {
            h.states.get(&1).is_some_and(|s| &s.endpoint == endpoint)
                && h.states.contains_key(&2)
        })
        .await;
    eventually(|| async move { h.snapshot(2).await.is_some_and(|s| s.online) }).await;

    // Everything removed: workers stop and their snapshots disappear
    harness.provider.replace_devices(Vec::new());
    harness
        .reload_until(|| async move {
            h.states.is_empty()
                && h.snapshot(1).await.is_none()
                && h.snapshot(2).await.is_none()
        })
        .await;
    harness.stop().await;
}

#[tokio::test]
async fn test_unchanged_device_keeps_worker_across_reload() {
    let sim_a = RtuSimulator::start(generator_registers()).await;
    let sim_b = RtuSimulator::start(generator_registers()).await;
    let sim_b_moved = RtuSimulator::start(generator_registers()).await;

    let rtdb: Arc<dyn Rtdb> = Arc::new(MemoryRtdb::new());
    let provider = Arc::new(StaticConfigProvider::new(
        vec![
            device(1, DeviceClass::Generator, ProtocolKind::RtuOverTcp, sim_a.addr),
            device(2, DeviceClass::Generator, ProtocolKind::RtuOverTcp, sim_b.addr),
        ],
        None,
    ));
    let mut orchestrator =
        PollerOrchestrator::new(provider.clone(), rtdb.clone(), &fast_poller_config());
    let mut updates = rtdb.subscribe(METRICS_CHANNEL).await.unwrap();

    let report = orchestrator.reconcile().await.unwrap();
    assert_eq!(report.added, vec![1, 2]);
    let mut last = next_snapshot(&mut updates, 1).await;
    assert!(last.online);

    // B moves to another bridge, A stays where it is
    provider.replace_devices(vec![
        device(1, DeviceClass::Generator, ProtocolKind::RtuOverTcp, sim_a.addr),
        device(2, DeviceClass::Generator, ProtocolKind::RtuOverTcp, sim_b_moved.addr),
    ]);
    let report = orchestrator.reconcile().await.unwrap();
    assert_eq!(report.unchanged, vec![1]);
    assert_eq!(report.replaced, vec![2]);
    assert!(report.added.is_empty() && report.removed.is_empty());

    // A keeps publishing on its own cadence through the reload
    for _ in 0..5 {
        let snapshot = next_snapshot(&mut updates, 1).await;
        assert!(snapshot.online);
        let gap = (snapshot.timestamp - last.timestamp).num_milliseconds();
        assert!((0..1000).contains(&gap), "gap of {gap}ms between snapshots");
        last = snapshot;
    }
    assert!(next_snapshot(&mut updates, 2).await.online);

    assert_eq!(sim_a.connections.load(Ordering::SeqCst), 1);
    assert_eq!(sim_b.connections.load(Ordering::SeqCst), 1);
    assert_eq!(sim_b_moved.connections.load(Ordering::SeqCst), 1);

    orchestrator.shutdown().await;
}

/// Provider whose first `failures` device loads fail
struct FlakyProvider {
    inner: StaticConfigProvider,
    failures: AtomicU32,
}

#[async_trait]
impl ConfigProvider for FlakyProvider {
    async fn list_active_devices(&self) -> Result<Vec<Device>> {
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(TelemetryError::storage("database is locked"));
        }
        self.inner.list_active_devices().await
    }

    async fn get_default_maintenance_template(&self) -> Result<Option<MaintenanceTemplate>> {
        self.inner.get_default_maintenance_template().await
    }
}

#[tokio::test]
async fn test_failed_initial_load_is_retried() {
    let sim = RtuSimulator::start(generator_registers()).await;
    let provider = Arc::new(FlakyProvider {
        inner: StaticConfigProvider::new(
            vec![device(1, DeviceClass::Generator, ProtocolKind::RtuOverTcp, sim.addr)],
            None,
        ),
        failures: AtomicU32::new(2),
    });
    let rtdb: Arc<dyn Rtdb> = Arc::new(MemoryRtdb::new());
    let orchestrator = PollerOrchestrator::new(provider.clone(), rtdb.clone(), &fast_poller_config());
    let states = orchestrator.states();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(orchestrator.run(shutdown.clone()));

    let s = &states;
    eventually(|| async move { s.get(&1).is_some_and(|state| state.online) }).await;
    assert_eq!(provider.failures.load(Ordering::SeqCst), 0);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
