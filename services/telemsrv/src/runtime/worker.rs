//! Per-device polling loop

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::backoff::RetryBackoff;
use super::publisher::SnapshotPublisher;
use crate::model::{Device, TelemetrySnapshot};
use crate::protocols::DeviceReader;

/// Error reported when a read succeeds but no block returned data
pub const NO_DATA_ERROR: &str = "no data received";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    /// Waiting for the next cycle
    Idle,
    Polling,
    /// Waiting out the retry delay after a failure
    Backoff,
    Stopped,
}

/// Last known poller state of one device, exposed on the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PollState {
    pub device_id: i64,
    pub name: String,
    pub endpoint: String,
    pub protocol: String,
    pub phase: PollPhase,
    pub connected: bool,
    pub online: bool,
    pub last_error: Option<String>,
    pub last_poll: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl PollState {
    fn new(device: &Device) -> Self {
        Self {
            device_id: device.id,
            name: device.name.clone(),
            endpoint: device.endpoint(),
            protocol: device.protocol.to_string(),
            phase: PollPhase::Idle,
            connected: false,
            online: false,
            last_error: None,
            last_poll: None,
            consecutive_failures: 0,
        }
    }
}

pub type PollStates = Arc<DashMap<i64, PollState>>;

/// Outcome of a single poll cycle
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Online,
    /// Read succeeded but nothing decoded
    Empty,
    Failed(String),
}

pub struct PollWorker {
    reader: DeviceReader,
    publisher: SnapshotPublisher,
    backoff: RetryBackoff,
    poll_interval: Duration,
    states: PollStates,
    cancel: CancellationToken,
    failures: u32,
}

impl PollWorker {
    pub fn new(
        reader: DeviceReader,
        publisher: SnapshotPublisher,
        backoff: RetryBackoff,
        poll_interval: Duration,
        states: PollStates,
        cancel: CancellationToken,
    ) -> Self {
        let device = reader.device();
        states.insert(device.id, PollState::new(device));
        Self {
            reader,
            publisher,
            backoff,
            poll_interval,
            states,
            cancel,
            failures: 0,
        }
    }

    fn device_id(&self) -> i64 {
        self.reader.device().id
    }

    fn set_phase(&self, phase: PollPhase) {
        if let Some(mut state) = self.states.get_mut(&self.device_id()) {
            state.phase = phase;
            state.connected = self.reader.is_connected();
        }
    }

    /// Poll until cancelled; cancellation is only observed between cycles
    pub async fn run(mut self) {
        let device_id = self.device_id();
        debug!("Poll worker started for device {}", device_id);

        while !self.cancel.is_cancelled() {
            self.set_phase(PollPhase::Polling);
            let wait = match self.poll_once().await {
                PollOutcome::Failed(_) => {
                    self.set_phase(PollPhase::Backoff);
                    self.backoff.delay(self.failures)
                },
                PollOutcome::Online | PollOutcome::Empty => {
                    self.set_phase(PollPhase::Idle);
                    self.poll_interval
                },
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(wait) => {},
            }
        }

        self.reader.close().await;
        self.set_phase(PollPhase::Stopped);
        debug!("Poll worker stopped for device {}", device_id);
    }

    /// Read once and publish the resulting snapshot
    pub async fn poll_once(&mut self) -> PollOutcome {
        let result = self.reader.read_all().await;
        let device = self.reader.device();

        let (snapshot, outcome) = match result {
            Ok(fields) if fields.is_empty() => {
                warn!("Device {}: read returned no data", device.id);
                (
                    TelemetrySnapshot::offline(device, NO_DATA_ERROR),
                    PollOutcome::Empty,
                )
            },
            Ok(fields) => (TelemetrySnapshot::online(device, fields), PollOutcome::Online),
            Err(e) => {
                error!("Poll error device {} ({}): {}", device.id, device.endpoint(), e);
                let message = e.to_string();
                (
                    TelemetrySnapshot::offline(device, message.clone()),
                    PollOutcome::Failed(message),
                )
            },
        };

        match &outcome {
            PollOutcome::Failed(_) => self.failures = self.failures.saturating_add(1),
            _ => self.failures = 0,
        }
        self.record(&snapshot);

        if let Err(e) = self.publisher.publish(&snapshot).await {
            error!("Device {}: failed to publish snapshot: {}", snapshot.device_id, e);
        }
        outcome
    }

    fn record(&self, snapshot: &TelemetrySnapshot) {
        if let Some(mut state) = self.states.get_mut(&snapshot.device_id) {
            state.online = snapshot.online;
            state.last_error = snapshot.error.clone();
            state.last_poll = Some(snapshot.timestamp);
            state.consecutive_failures = self.failures;
            state.connected = self.reader.is_connected();
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::model::{DeviceClass, ProtocolKind};
    use crate::protocols::ReaderTiming;
    use scada_rtdb::MemoryRtdb;
    use tokio::net::TcpListener;
    use tracing_test::traced_test;

    async fn unreachable_device() -> Device {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Device {
            id: 7,
            name: "Gen7".to_string(),
            site_code: "MKZ".to_string(),
            device_class: DeviceClass::Generator,
            protocol: ProtocolKind::FramedTcp,
            host: addr.ip().to_string(),
            port: addr.port(),
            unit_id: 1,
            active: true,
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_poll_publishes_offline_snapshot() {
        let device = unreachable_device().await;
        let rtdb = Arc::new(MemoryRtdb::new());
        let publisher = SnapshotPublisher::new(rtdb);
        let states: PollStates = Arc::new(DashMap::new());
        let mut worker = PollWorker::new(
            DeviceReader::for_device(device.clone(), ReaderTiming::default()),
            publisher.clone(),
            RetryBackoff::fixed(Duration::from_millis(10)),
            Duration::from_millis(10),
            states.clone(),
            CancellationToken::new(),
        );
        assert!(!states.get(&7).unwrap().online);

        assert!(matches!(worker.poll_once().await, PollOutcome::Failed(_)));
        assert!(matches!(worker.poll_once().await, PollOutcome::Failed(_)));

        let state = states.get(&7).unwrap().clone();
        assert!(!state.online);
        assert!(!state.connected);
        assert_eq!(state.consecutive_failures, 2);
        assert!(state.last_error.is_some());

        let snapshot = publisher.latest(7).await.unwrap().unwrap();
        assert!(!snapshot.online);
        assert!(snapshot.fields.is_empty());
        assert!(logs_contain("Poll error device 7"));
    }

    #[tokio::test]
    async fn test_cancelled_worker_stops() {
        let device = unreachable_device().await;
        let states: PollStates = Arc::new(DashMap::new());
        let cancel = CancellationToken::new();
        let worker = PollWorker::new(
            DeviceReader::for_device(device, ReaderTiming::default()),
            SnapshotPublisher::new(Arc::new(MemoryRtdb::new())),
            RetryBackoff::fixed(Duration::from_secs(60)),
            Duration::from_secs(60),
            states.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn(worker.run());

        // Parked in the 60s backoff after the first failure
        tokio::time::timeout(Duration::from_secs(5), async {
            while states.get(&7).map_or(true, |s| s.phase != PollPhase::Backoff) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(states.get(&7).unwrap().phase, PollPhase::Stopped);
    }
}
