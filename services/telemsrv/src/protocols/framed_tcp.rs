//! Standard Modbus-TCP reader built on `tokio-modbus`

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Client as _, Context, Reader as _};
use tokio_modbus::Slave;
use tracing::{debug, info, warn};

use super::register_map::RegisterMap;
use super::ReaderTiming;
use crate::error::{Result, TelemetryError};
use crate::model::{Device, FieldMap};

/// Reader holding one persistent Modbus-TCP connection.
///
/// The connection is opened lazily and dropped after any transport
/// failure, so the next poll reconnects before reading.
pub struct FramedTcpReader {
    device: Device,
    map: &'static RegisterMap,
    timing: ReaderTiming,
    ctx: Option<Context>,
}

impl FramedTcpReader {
    pub fn new(device: Device, timing: ReaderTiming) -> Self {
        let map = RegisterMap::for_class(device.device_class);
        Self {
            device,
            map,
            timing,
            ctx: None,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        let endpoint = self.device.endpoint();
        let stream = timeout(self.timing.response_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| TelemetryError::timeout(format!("connect to {endpoint} timed out")))?
            .map_err(|e| TelemetryError::connection(format!("cannot connect to {endpoint}: {e}")))?;
        stream.set_nodelay(true)?;

        self.ctx = Some(tcp::attach_slave(stream, Slave(self.device.unit_id)));
        info!(
            "Modbus-TCP connected: device {} at {} unit {}",
            self.device.id, endpoint, self.device.unit_id
        );
        Ok(())
    }

    pub async fn read_all(&mut self) -> Result<FieldMap> {
        if self.ctx.is_none() {
            self.connect().await?;
        }

        let result = self.read_blocks().await;
        if result.is_err() {
            self.ctx = None;
        }
        result
    }

    async fn read_blocks(&mut self) -> Result<FieldMap> {
        let ctx = self.ctx.as_mut().ok_or_else(TelemetryError::not_connected)?;
        let device_id = self.device.id;
        let endpoint = self.device.endpoint();
        let mut fields = FieldMap::new();

        for block in self.map.blocks {
            let response = timeout(
                self.timing.response_timeout,
                ctx.read_holding_registers(block.start, block.count),
            )
            .await
            .map_err(|_| {
                TelemetryError::timeout(format!(
                    "block {} @{} timed out on {}",
                    block.name,
                    block.start,
                    endpoint
                ))
            })??;

            let words = match response {
                Ok(words) => words,
                Err(exception) => {
                    warn!(
                        "Device {}: read error block {} @{}: {:?}",
                        device_id, block.name, block.start, exception
                    );
                    continue;
                },
            };

            if let Err(e) = block.decode_into(&words, &mut fields) {
                warn!("Device {}: {}", device_id, e);
            }
        }

        if fields.is_empty() {
            warn!("Device {}: all blocks returned empty", device_id);
        } else {
            self.map.derive(&mut fields);
        }
        Ok(fields)
    }

    /// Best-effort disconnect bounded by the close timeout
    pub async fn close(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            match timeout(self.timing.close_timeout, ctx.disconnect()).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => debug!("Device {}: disconnect error: {}", self.device.id, e),
                Err(_) => debug!("Device {}: disconnect timed out", self.device.id),
            }
        }
    }
}
