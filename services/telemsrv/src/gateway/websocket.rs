//! WebSocket fan-out of the telemetry and alert channels
//!
//! Each client gets the full set of stored snapshots on connect, then every
//! message published on the metrics and alerts channels, forwarded verbatim.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use scada_rtdb::{Rtdb, DEVICE_METRICS_PATTERN};
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::routes::AppState;

/// Delay before re-subscribing after a bus subscription ends
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Connected WebSocket clients
#[derive(Default)]
pub struct WsConnectionManager {
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl WsConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, tx: mpsc::UnboundedSender<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.connections.write().await.insert(id, tx);
        id
    }

    pub async fn unregister(&self, id: &Uuid) {
        self.connections.write().await.remove(id);
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send to every client, dropping those whose socket task is gone.
    /// Returns the number of clients reached.
    pub async fn broadcast(&self, message: &str) -> usize {
        let mut dead = Vec::new();
        let mut delivered = 0;
        {
            let connections = self.connections.read().await;
            for (id, tx) in connections.iter() {
                if tx.send(message.to_string()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            let mut connections = self.connections.write().await;
            for id in dead {
                debug!("Dropping closed WebSocket client {}", id);
                connections.remove(&id);
            }
        }
        delivered
    }
}

/// Forward every message of `channel` to all WebSocket clients until
/// `shutdown` fires, re-subscribing whenever the subscription drops
pub fn spawn_bus_bridge(
    rtdb: Arc<dyn Rtdb>,
    manager: Arc<WsConnectionManager>,
    channel: &'static str,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        'outer: loop {
            match rtdb.subscribe(channel).await {
                Ok(mut stream) => {
                    info!("WebSocket bridge subscribed to {}", channel);
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break 'outer,
                            message = stream.next() => match message {
                                Some(payload) => {
                                    manager.broadcast(&payload).await;
                                },
                                None => {
                                    warn!("Subscription to {} ended", channel);
                                    break;
                                },
                            },
                        }
                    }
                },
                Err(e) => error!("Subscribe to {} failed: {:#}", channel, e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break 'outer,
                _ = sleep(RESUBSCRIBE_DELAY) => {},
            }
        }
        debug!("WebSocket bridge for {} stopped", channel);
    })
}

/// `{"type":"snapshot","data":[...]}` built from every stored device snapshot
pub async fn initial_snapshot(rtdb: &dyn Rtdb) -> anyhow::Result<String> {
    let mut data = Vec::new();
    for key in rtdb.scan_match(DEVICE_METRICS_PATTERN).await? {
        let Some(raw) = rtdb.get(&key).await? else {
            continue;
        };
        match serde_json::from_slice::<Value>(&raw) {
            Ok(value) => data.push(value),
            Err(e) => warn!("Skipping malformed snapshot {}: {}", key, e),
        }
    }
    Ok(json!({ "type": "snapshot", "data": data }).to_string())
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Register before reading the snapshot so no update published in
    // between is lost; it queues in `rx` behind the snapshot.
    let client_id = state.ws_manager.register(tx.clone()).await;
    info!("WebSocket client {} connected", client_id);

    match initial_snapshot(state.rtdb.as_ref()).await {
        Ok(snapshot) => {
            if sender.send(Message::Text(snapshot.into())).await.is_err() {
                state.ws_manager.unregister(&client_id).await;
                return;
            }
        },
        Err(e) => warn!("Failed to build initial snapshot: {:#}", e),
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) if text.as_str() == "ping" => {
                    if tx.send("pong".to_string()).is_err() {
                        break;
                    }
                },
                Message::Text(text) => debug!("Ignoring client message: {}", text.as_str()),
                Message::Close(_) => break,
                _ => {},
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.ws_manager.unregister(&client_id).await;
    info!("WebSocket client {} disconnected", client_id);
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use scada_rtdb::{device_metrics_key, MemoryRtdb, METRICS_CHANNEL};

    #[tokio::test]
    async fn test_broadcast_drops_closed_clients() {
        let manager = WsConnectionManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        manager.register(tx1).await;
        manager.register(tx2).await;
        drop(rx2);

        assert_eq!(manager.broadcast("hello").await, 1);
        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn test_initial_snapshot_collects_devices() {
        let rtdb = MemoryRtdb::new();
        rtdb.set(
            &device_metrics_key(1),
            Bytes::from(r#"{"device_id":1,"online":true}"#),
        )
        .await
        .unwrap();
        rtdb.set(&device_metrics_key(2), Bytes::from("not json"))
            .await
            .unwrap();
        rtdb.set("unrelated", Bytes::from("{}")).await.unwrap();

        let snapshot: Value =
            serde_json::from_str(&initial_snapshot(&rtdb).await.unwrap()).unwrap();
        assert_eq!(snapshot["type"], "snapshot");
        let data = snapshot["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["device_id"], 1);
    }

    #[tokio::test]
    async fn test_bridge_forwards_verbatim() {
        let rtdb: Arc<dyn Rtdb> = Arc::new(MemoryRtdb::new());
        let manager = Arc::new(WsConnectionManager::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.register(tx).await;

        let shutdown = CancellationToken::new();
        let bridge = spawn_bus_bridge(rtdb.clone(), manager, METRICS_CHANNEL, shutdown.clone());

        // Wait until the bridge has subscribed
        let payload = r#"{"device_id":7,"online":false,"error":"no data received"}"#;
        let received = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                rtdb.publish(METRICS_CHANNEL, payload).await.unwrap();
                if let Ok(Some(msg)) =
                    tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
                {
                    return msg;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(received, payload);

        shutdown.cancel();
        bridge.await.unwrap();
    }
}
