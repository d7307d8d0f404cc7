//! Shared helpers for telemsrv integration tests
//!
//! Provides two in-process controller simulators listening on loopback:
//! a raw RTU-over-TCP responder and a standard Modbus-TCP server.

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::HashMap;
use std::future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

use telemsrv::config::PollerConfig;
use telemsrv::model::{Device, DeviceClass, ProtocolKind};
use telemsrv::protocols::crc::{append_crc, verify_crc};

pub type Registers = Arc<Mutex<HashMap<u16, u16>>>;

/// Poller timings short enough for tests
pub fn fast_poller_config() -> PollerConfig {
    PollerConfig {
        poll_interval_ms: 50,
        modbus_timeout_ms: 300,
        retry_delay_ms: 100,
        close_timeout_ms: 100,
        inter_frame_delay_ms: 2,
        inter_block_delay_ms: 1,
        flush_timeout_ms: 2,
        ..PollerConfig::default()
    }
}

pub fn device(
    id: i64,
    class: DeviceClass,
    protocol: ProtocolKind,
    addr: SocketAddr,
) -> Device {
    Device {
        id,
        name: format!("Device{id}"),
        site_code: "MKZ".to_string(),
        device_class: class,
        protocol,
        host: addr.ip().to_string(),
        port: addr.port(),
        unit_id: 1,
        active: true,
    }
}

/// An address nothing listens on
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Register image of a running generator
pub fn generator_registers() -> HashMap<u16, u16> {
    let mut regs = HashMap::new();
    // status: auto mode
    regs.insert(0, 1 << 9);
    // generator frequency 50.02 Hz
    regs.insert(155, 5002);
    // engine speed, coolant sensor unplugged, oil temp 85
    regs.insert(212, 1500);
    regs.insert(220, 32766);
    regs.insert(234, 85);
    // gen_status running, 1250 run hours
    regs.insert(260, 9);
    regs.insert(270, 1250);
    regs
}

// ============================================================================
// RTU over TCP
// ============================================================================

/// Serial bridge simulator answering FC03 frames from a register image
pub struct RtuSimulator {
    pub addr: SocketAddr,
    pub registers: Registers,
    /// Stop answering while set; requests are still consumed
    pub silent: Arc<AtomicBool>,
    pub requests: Arc<AtomicUsize>,
    /// Accepted TCP connections
    pub connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl RtuSimulator {
    pub async fn start(registers: HashMap<u16, u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registers = Arc::new(Mutex::new(registers));
        let silent = Arc::new(AtomicBool::new(false));
        let requests = Arc::new(AtomicUsize::new(0));
        let connections = Arc::new(AtomicUsize::new(0));

        let (regs, mute, count) = (registers.clone(), silent.clone(), requests.clone());
        let accepted = connections.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_rtu(stream, regs.clone(), mute.clone(), count.clone()));
            }
        });

        Self {
            addr,
            registers,
            silent,
            requests,
            connections,
            handle,
        }
    }

    pub fn set(&self, address: u16, value: u16) {
        self.registers.lock().insert(address, value);
    }

    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }
}

impl Drop for RtuSimulator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_rtu(
    mut stream: TcpStream,
    registers: Registers,
    silent: Arc<AtomicBool>,
    requests: Arc<AtomicUsize>,
) {
    let mut request = [0u8; 8];
    while stream.read_exact(&mut request).await.is_ok() {
        requests.fetch_add(1, Ordering::SeqCst);
        if silent.load(Ordering::SeqCst) || !verify_crc(&request) {
            continue;
        }

        let unit = request[0];
        let start = u16::from_be_bytes([request[2], request[3]]);
        let count = u16::from_be_bytes([request[4], request[5]]);

        let mut response = vec![unit, request[1], (count * 2) as u8];
        {
            let regs = registers.lock();
            for address in start..start + count {
                let value = regs.get(&address).copied().unwrap_or(0);
                response.extend_from_slice(&value.to_be_bytes());
            }
        }
        append_crc(&mut response);

        // Split the answer the way a serial bridge does
        let (head, tail) = response.split_at(response.len() / 2);
        if stream.write_all(head).await.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        if stream.write_all(tail).await.is_err() {
            break;
        }
    }
}

// ============================================================================
// Modbus TCP
// ============================================================================

#[derive(Clone)]
struct RegisterService {
    registers: Registers,
}

impl tokio_modbus::server::Service for RegisterService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let result = match req {
            Request::ReadHoldingRegisters(start, count) => {
                let regs = self.registers.lock();
                // Addresses beyond 500 are not implemented by this controller
                if start >= 500 {
                    Err(ExceptionCode::IllegalDataAddress)
                } else {
                    Ok(Response::ReadHoldingRegisters(
                        (start..start + count)
                            .map(|address| regs.get(&address).copied().unwrap_or(0))
                            .collect(),
                    ))
                }
            },
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(result)
    }
}

/// Modbus-TCP server backed by a register image
pub struct FramedSimulator {
    pub addr: SocketAddr,
    pub registers: Registers,
    handle: JoinHandle<()>,
}

impl FramedSimulator {
    pub async fn start(registers: HashMap<u16, u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registers = Arc::new(Mutex::new(registers));

        let service = RegisterService {
            registers: registers.clone(),
        };
        let server = Server::new(listener);
        let handle = tokio::spawn(async move {
            let new_service = move |_addr| Ok(Some(service.clone()));
            let on_connected = move |stream, socket_addr| {
                let new_service = new_service.clone();
                async move { accept_tcp_connection(stream, socket_addr, new_service) }
            };
            let on_process_error = |err| eprintln!("simulator error: {err}");
            let _ = server.serve(&on_connected, on_process_error).await;
        });

        Self {
            addr,
            registers,
            handle,
        }
    }
}

impl Drop for FramedSimulator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
