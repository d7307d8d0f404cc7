//! Modbus RTU tunnelled over a raw TCP socket
//!
//! The controller sits behind a serial-to-Ethernet bridge that forwards RTU
//! bytes without any TCP-level framing. Responses may arrive split across
//! arbitrary reads, so the receive side accumulates bytes until
//! [`frame_complete`] holds or the response deadline passes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::crc::{append_crc, verify_crc};
use super::register_map::RegisterMap;
use super::ReaderTiming;
use crate::error::{Result, TelemetryError};
use crate::model::{Device, FieldMap};

pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// Smallest frame worth inspecting: unit, function, byte count/exception, CRC
const MIN_FRAME_LEN: usize = 5;
const FLUSH_BUFFER_SIZE: usize = 1024;
const RECV_CHUNK_SIZE: usize = 256;

/// Build `[unit][0x03][start][count][crc]` with big-endian fields and a
/// little-endian CRC
pub fn build_read_request(unit_id: u8, start: u16, count: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(unit_id);
    frame.push(READ_HOLDING_REGISTERS);
    frame.extend_from_slice(&start.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    append_crc(&mut frame);
    frame
}

/// True once `buf` holds a whole FC03 response or an exception response
pub fn frame_complete(buf: &[u8]) -> bool {
    if buf.len() < MIN_FRAME_LEN {
        return false;
    }
    if buf[1] == READ_HOLDING_REGISTERS {
        buf.len() >= 3 + usize::from(buf[2]) + 2
    } else {
        buf[1] & 0x80 != 0
    }
}

/// Parse an FC03 response into register words
pub fn parse_read_response(buf: &[u8]) -> Result<Vec<u16>> {
    if buf.len() < MIN_FRAME_LEN {
        return Err(TelemetryError::protocol(format!(
            "short frame: {} bytes",
            buf.len()
        )));
    }

    let function = buf[1];
    if function & 0x80 != 0 {
        return Err(TelemetryError::protocol(format!(
            "exception response: function 0x{:02X}, code 0x{:02X}",
            function, buf[2]
        )));
    }
    if function != READ_HOLDING_REGISTERS {
        return Err(TelemetryError::protocol(format!(
            "unexpected function code 0x{function:02X}"
        )));
    }

    let byte_count = usize::from(buf[2]);
    let frame_len = 3 + byte_count + 2;
    if buf.len() < frame_len {
        return Err(TelemetryError::protocol(format!(
            "truncated frame: expected {} bytes, got {}",
            frame_len,
            buf.len()
        )));
    }

    let frame = &buf[..frame_len];
    if !verify_crc(frame) {
        return Err(TelemetryError::protocol("CRC mismatch"));
    }

    Ok(frame[3..3 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// One open RTU conversation over a byte stream
pub struct RtuSession<S> {
    stream: S,
    unit_id: u8,
    timing: ReaderTiming,
}

impl<S> RtuSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, unit_id: u8, timing: ReaderTiming) -> Self {
        Self {
            stream,
            unit_id,
            timing,
        }
    }

    /// Drop bytes left over from an earlier, late answer
    async fn flush_stale(&mut self) -> Result<()> {
        let mut scratch = [0u8; FLUSH_BUFFER_SIZE];
        match timeout(self.timing.flush_timeout, self.stream.read(&mut scratch)).await {
            Ok(Ok(0)) => Err(TelemetryError::connection(
                "connection closed by peer (EOF on flush)",
            )),
            Ok(Ok(n)) => {
                debug!("RTU unit {}: flushed {} stale bytes", self.unit_id, n);
                Ok(())
            },
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(()),
        }
    }

    /// Write one request frame within the response deadline
    async fn send(&mut self, request: &[u8]) -> Result<()> {
        let write = async {
            self.stream.write_all(request).await?;
            self.stream.flush().await
        };
        match timeout(self.timing.response_timeout, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TelemetryError::connection(format!(
                "write stalled for {:?}",
                self.timing.response_timeout
            ))),
        }
    }

    /// Accumulate bytes until a frame is complete or the deadline passes
    async fn receive(&mut self) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timing.response_timeout;
        let mut buf = Vec::with_capacity(RECV_CHUNK_SIZE);
        let mut chunk = [0u8; RECV_CHUNK_SIZE];

        while !frame_complete(&buf) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => return Err(TelemetryError::connection("connection closed by peer")),
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }
        Ok(buf)
    }

    /// Read `count` holding registers at `start`.
    ///
    /// `Ok(None)` means the device never answered within the deadline.
    /// Malformed or exception answers are protocol errors.
    pub async fn read_registers(&mut self, start: u16, count: u16) -> Result<Option<Vec<u16>>> {
        self.flush_stale().await?;

        let request = build_read_request(self.unit_id, start, count);
        self.send(&request).await?;

        sleep(self.timing.inter_frame_delay).await;

        let response = self.receive().await?;
        if response.is_empty() {
            return Ok(None);
        }
        parse_read_response(&response).map(Some)
    }

    /// Read and decode every block of `map`
    ///
    /// A block that gets no answer or a bad frame is skipped; transport
    /// failures abort the whole read.
    pub async fn read_map(&mut self, map: &RegisterMap, device_id: i64) -> Result<FieldMap> {
        let mut fields = FieldMap::new();

        for (index, block) in map.blocks.iter().enumerate() {
            if index > 0 {
                sleep(self.timing.inter_block_delay).await;
            }

            let words = match self.read_registers(block.start, block.count).await {
                Ok(Some(words)) => words,
                Ok(None) => {
                    warn!(
                        "Device {}: no response for block {} @{}",
                        device_id, block.name, block.start
                    );
                    continue;
                },
                Err(TelemetryError::ProtocolError(msg)) => {
                    warn!(
                        "Device {}: bad response for block {} @{}: {}",
                        device_id, block.name, block.start, msg
                    );
                    continue;
                },
                Err(e) => return Err(e),
            };

            if let Err(e) = block.decode_into(&words, &mut fields) {
                warn!("Device {}: {}", device_id, e);
            }
        }

        if fields.is_empty() {
            warn!("Device {}: all blocks returned empty", device_id);
        } else {
            map.derive(&mut fields);
        }
        Ok(fields)
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Reader for controllers reached through a serial-to-Ethernet bridge
pub struct RtuOverTcpReader {
    device: Device,
    map: &'static RegisterMap,
    timing: ReaderTiming,
    session: Option<RtuSession<TcpStream>>,
}

impl RtuOverTcpReader {
    pub fn new(device: Device, timing: ReaderTiming) -> Self {
        let map = RegisterMap::for_class(device.device_class);
        Self {
            device,
            map,
            timing,
            session: None,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        let endpoint = self.device.endpoint();
        let stream = timeout(self.timing.response_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| TelemetryError::timeout(format!("connect to {endpoint} timed out")))?
            .map_err(|e| TelemetryError::connection(format!("cannot connect to {endpoint}: {e}")))?;
        stream.set_nodelay(true)?;

        info!(
            "RTU-over-TCP connected: device {} at {} unit {}",
            self.device.id, endpoint, self.device.unit_id
        );
        self.session = Some(RtuSession::new(stream, self.device.unit_id, self.timing));
        Ok(())
    }

    /// Read all blocks, connecting first if needed.
    ///
    /// Any transport failure drops the connection so the next call
    /// reconnects from scratch.
    pub async fn read_all(&mut self) -> Result<FieldMap> {
        if self.session.is_none() {
            self.connect().await?;
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(TelemetryError::not_connected)?;

        let result = session.read_map(self.map, self.device.id).await;
        if result.is_err() {
            self.session = None;
        }
        result
    }

    /// Best-effort close bounded by the close timeout
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if timeout(self.timing.close_timeout, session.shutdown())
                .await
                .is_err()
            {
                debug!("Device {}: close timed out", self.device.id);
            }
        }
    }
}

/// Lets tests run the session over an in-memory pipe
#[cfg(test)]
impl RtuSession<tokio::io::DuplexStream> {
    fn for_test(stream: tokio::io::DuplexStream, timing: ReaderTiming) -> Self {
        Self::new(stream, 1, timing)
    }
}
