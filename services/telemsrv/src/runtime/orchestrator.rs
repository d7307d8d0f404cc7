//! Device poller orchestration and hot reload
//!
//! Owns one poll worker per active device. A message on the reload channel
//! triggers a diff of the configured device list against the running
//! workers: removed devices are retired, devices whose wiring changed get a
//! fresh reader, new devices get a worker, everything else keeps running
//! untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use scada_rtdb::{Rtdb, RELOAD_CHANNEL};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::RetryBackoff;
use super::publisher::SnapshotPublisher;
use super::worker::{PollStates, PollWorker};
use crate::config::{validate_device, PollerConfig};
use crate::error::Result;
use crate::model::Device;
use crate::protocols::{DeviceReader, ReaderTiming};
use crate::providers::ConfigProvider;

/// Delay before re-subscribing after the reload channel drops
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

struct WorkerHandle {
    device: Device,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Device ids touched by one reconciliation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<i64>,
    pub replaced: Vec<i64>,
    pub removed: Vec<i64>,
    pub unchanged: Vec<i64>,
}

pub struct PollerOrchestrator {
    provider: Arc<dyn ConfigProvider>,
    rtdb: Arc<dyn Rtdb>,
    publisher: SnapshotPublisher,
    timing: ReaderTiming,
    backoff: RetryBackoff,
    poll_interval: Duration,
    workers: HashMap<i64, WorkerHandle>,
    states: PollStates,
}

impl PollerOrchestrator {
    pub fn new(
        provider: Arc<dyn ConfigProvider>,
        rtdb: Arc<dyn Rtdb>,
        config: &PollerConfig,
    ) -> Self {
        Self {
            provider,
            publisher: SnapshotPublisher::new(rtdb.clone()),
            rtdb,
            timing: ReaderTiming::from_config(config),
            backoff: RetryBackoff::from_config(config),
            poll_interval: config.poll_interval(),
            workers: HashMap::new(),
            states: Arc::new(DashMap::new()),
        }
    }

    /// Shared view of every worker's state
    pub fn states(&self) -> PollStates {
        self.states.clone()
    }

    pub fn active_device_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Reload the device list and converge the running workers onto it
    pub async fn reconcile(&mut self) -> Result<ReconcileReport> {
        let devices = self.provider.list_active_devices().await?;

        let mut desired: HashMap<i64, Device> = HashMap::new();
        for device in devices.into_iter().filter(|d| d.active) {
            if let Err(e) = validate_device(&device) {
                warn!("Skipping device {}: {}", device.id, e);
                continue;
            }
            desired.insert(device.id, device);
        }

        let mut report = ReconcileReport::default();

        let gone: Vec<i64> = self
            .workers
            .keys()
            .filter(|id| !desired.contains_key(id))
            .copied()
            .collect();
        for id in gone {
            info!("Removing reader for device {}", id);
            self.retire(id).await;
            if let Err(e) = self.publisher.forget(id).await {
                warn!("Device {}: failed to drop snapshot: {}", id, e);
            }
            report.removed.push(id);
        }

        let mut ids: Vec<i64> = desired.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let Some(device) = desired.remove(&id) else {
                continue;
            };
            match self.workers.get(&id) {
                Some(handle) if handle.device.same_wiring(&device) => {
                    report.unchanged.push(id);
                },
                Some(handle) => {
                    info!(
                        "Device {} config changed ({} -> {}), reconnecting",
                        id,
                        handle.device.endpoint(),
                        device.endpoint()
                    );
                    self.retire(id).await;
                    self.spawn_worker(device);
                    report.replaced.push(id);
                },
                None => {
                    info!(
                        "New device {} ({}) at {} [{}]",
                        id,
                        device.name,
                        device.endpoint(),
                        device.protocol
                    );
                    self.spawn_worker(device);
                    report.added.push(id);
                },
            }
        }

        info!(
            "Reload complete: {} active, {} added, {} replaced, {} removed",
            self.workers.len(),
            report.added.len(),
            report.replaced.len(),
            report.removed.len()
        );
        Ok(report)
    }

    fn spawn_worker(&mut self, device: Device) {
        let cancel = CancellationToken::new();
        let reader = DeviceReader::for_device(device.clone(), self.timing);
        let worker = PollWorker::new(
            reader,
            self.publisher.clone(),
            self.backoff.clone(),
            self.poll_interval,
            self.states.clone(),
            cancel.clone(),
        );
        let join = tokio::spawn(worker.run());
        self.workers.insert(
            device.id,
            WorkerHandle {
                device,
                cancel,
                join,
            },
        );
    }

    /// Stop a worker; a worker stuck past its read deadline is aborted
    async fn retire(&mut self, device_id: i64) {
        let Some(handle) = self.workers.remove(&device_id) else {
            return;
        };
        handle.cancel.cancel();

        let grace = self.timing.response_timeout + self.timing.close_timeout;
        let mut join = handle.join;
        let finished = match timeout(grace, &mut join).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Device {}: worker did not stop in {:?}, aborting", device_id, grace);
                join.abort();
                join.await
            },
        };
        if let Err(e) = finished {
            if e.is_panic() {
                error!("Device {}: poll worker panicked: {}", device_id, e);
            }
        }
        self.states.remove(&device_id);
    }

    /// Stop every worker and close their connections
    pub async fn shutdown(&mut self) {
        let ids: Vec<i64> = self.workers.keys().copied().collect();
        for handle in self.workers.values() {
            handle.cancel.cancel();
        }
        for id in ids {
            self.retire(id).await;
        }
        info!("All poll workers stopped");
    }

    /// Reconcile once; a failure is logged and leaves the workers as they are
    async fn reload(&mut self) -> bool {
        match self.reconcile().await {
            Ok(_) => {
                if self.workers.is_empty() {
                    warn!("No active devices configured");
                }
                true
            },
            Err(e) => {
                error!("Device reload failed: {}", e);
                false
            },
        }
    }

    /// Load the device list, then serve reload signals until `shutdown` fires.
    ///
    /// The reload channel is subscribed before the first load so a signal
    /// sent during startup is not lost. Until one load has succeeded it is
    /// retried every retry delay.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!("Poller orchestrator starting");
        let mut loaded = false;

        'outer: loop {
            let mut reloads = match self.rtdb.subscribe(RELOAD_CHANNEL).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Reload listener error: {:#}", e);
                    if !loaded {
                        loaded = self.reload().await;
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break 'outer,
                        _ = sleep(RESUBSCRIBE_DELAY) => continue 'outer,
                    }
                },
            };

            if !loaded {
                loaded = self.reload().await;
            }

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break 'outer,
                    _ = sleep(self.backoff.initial_delay), if !loaded => {
                        info!("Retrying initial device load");
                        loaded = self.reload().await;
                    },
                    message = reloads.next() => match message {
                        Some(_) => {
                            info!("Received reload signal");
                            if self.reload().await {
                                loaded = true;
                            }
                        },
                        None => {
                            warn!("Reload channel closed, re-subscribing");
                            break;
                        },
                    },
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break 'outer,
                _ = sleep(RESUBSCRIBE_DELAY) => {},
            }
        }

        debug!("Poller orchestrator shutting down");
        self.shutdown().await;
        Ok(())
    }
}

impl Drop for PollerOrchestrator {
    fn drop(&mut self) {
        for handle in self.workers.values() {
            handle.cancel.cancel();
        }
    }
}
