//! Controller protocol readers
//!
//! A [`DeviceReader`] is chosen once per device from its protocol kind and
//! never switches transport afterwards. Both variants read the register map
//! of the device class and return the decoded union of all blocks.

pub mod crc;
pub mod decoder;
pub mod framed_tcp;
pub mod register_map;
pub mod rtu_over_tcp;

use std::time::Duration;

pub use framed_tcp::FramedTcpReader;
pub use register_map::RegisterMap;
pub use rtu_over_tcp::{RtuOverTcpReader, RtuSession};

use crate::config::PollerConfig;
use crate::error::Result;
use crate::model::{Device, FieldMap, ProtocolKind};

/// Deadlines and bus pacing shared by both readers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderTiming {
    /// Connect and per-request response deadline
    pub response_timeout: Duration,
    pub close_timeout: Duration,
    /// Serial bus settling time between request and first receive
    pub inter_frame_delay: Duration,
    pub inter_block_delay: Duration,
    pub flush_timeout: Duration,
}

impl Default for ReaderTiming {
    fn default() -> Self {
        Self::from_config(&PollerConfig::default())
    }
}

impl ReaderTiming {
    pub fn from_config(config: &PollerConfig) -> Self {
        Self {
            response_timeout: Duration::from_millis(config.modbus_timeout_ms),
            close_timeout: Duration::from_millis(config.close_timeout_ms),
            inter_frame_delay: Duration::from_millis(config.inter_frame_delay_ms),
            inter_block_delay: Duration::from_millis(config.inter_block_delay_ms),
            flush_timeout: Duration::from_millis(config.flush_timeout_ms),
        }
    }
}

/// Transport-specific reader for one device
pub enum DeviceReader {
    FramedTcp(FramedTcpReader),
    RtuOverTcp(RtuOverTcpReader),
}

impl DeviceReader {
    pub fn for_device(device: Device, timing: ReaderTiming) -> Self {
        match device.protocol {
            ProtocolKind::FramedTcp => DeviceReader::FramedTcp(FramedTcpReader::new(device, timing)),
            ProtocolKind::RtuOverTcp => {
                DeviceReader::RtuOverTcp(RtuOverTcpReader::new(device, timing))
            },
        }
    }

    pub fn device(&self) -> &Device {
        match self {
            DeviceReader::FramedTcp(r) => r.device(),
            DeviceReader::RtuOverTcp(r) => r.device(),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            DeviceReader::FramedTcp(r) => r.is_connected(),
            DeviceReader::RtuOverTcp(r) => r.is_connected(),
        }
    }

    /// Read every register block, connecting first when needed
    pub async fn read_all(&mut self) -> Result<FieldMap> {
        match self {
            DeviceReader::FramedTcp(r) => r.read_all().await,
            DeviceReader::RtuOverTcp(r) => r.read_all().await,
        }
    }

    pub async fn close(&mut self) {
        match self {
            DeviceReader::FramedTcp(r) => r.close().await,
            DeviceReader::RtuOverTcp(r) => r.close().await,
        }
    }
}
