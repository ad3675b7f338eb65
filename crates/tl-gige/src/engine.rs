//! GVCP engine (C5): drives the socket set through the codec and backend,
//! applying the controller state machine, and sends acks.
//!
//! Mirrors `_handle_control_packet` from the source's proxy and sink,
//! which are otherwise near-identical — this crate unifies them into one
//! loop used by both deployment shapes.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{info, trace, warn};

use crate::backend::{regs, RegisterBackend};
use crate::codec::{self, Command};
use crate::controller::Controller;
use crate::gvcp::consts::DISCOVERY_BUFFER;
use crate::socket_set::SocketSet;

/// Poll timeout for the standalone proxy's receive loop.
pub const PROXY_POLL_TIMEOUT: Duration = Duration::from_millis(1000);
/// Poll timeout for the sink form's receive loop.
pub const SINK_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Shared, mutex-guarded camera state: the backend plus the controller
/// record, matching the source's single coarse lock around both.
pub struct SharedState {
    pub backend: Box<dyn RegisterBackend>,
    pub controller: Controller,
}

impl SharedState {
    pub fn new(backend: Box<dyn RegisterBackend>) -> Self {
        Self {
            backend,
            controller: Controller::new(),
        }
    }
}

fn heartbeat_timeout(backend: &dyn RegisterBackend) -> Duration {
    let ms = backend.read_register(regs::HEARTBEAT_TIMEOUT).unwrap_or(
        crate::backend::DEFAULT_HEARTBEAT_TIMEOUT_MS,
    );
    Duration::from_millis(ms as u64)
}

fn is_stream_channel_0_register(address: u32) -> bool {
    matches!(
        address,
        regs::STREAM_CHANNEL_0_IP_ADDRESS
            | regs::STREAM_CHANNEL_0_PORT
            | regs::STREAM_CHANNEL_0_PACKET_SIZE
    )
}

/// Derive the Ethernet multicast MAC `01:00:5e:xx:xx:xx` from the low 23
/// bits of a multicast (224.0.0.0/4) IPv4 address, per the GigE Vision
/// convention for streaming to a multicast group.
pub fn multicast_mac(ip: Ipv4Addr) -> Option<[u8; 6]> {
    let raw = u32::from(ip);
    if raw & 0xF000_0000 != 0xE000_0000 {
        return None;
    }
    let low23 = raw & 0x007F_FFFF;
    Some([
        0x01,
        0x00,
        0x5e,
        (low23 >> 16) as u8,
        (low23 >> 8) as u8,
        low23 as u8,
    ])
}

fn notify_stream_config_changed(backend: &mut dyn RegisterBackend) {
    let ip = Ipv4Addr::from(backend.read_register(regs::STREAM_CHANNEL_0_IP_ADDRESS).unwrap_or(0));
    let port = backend
        .read_register(regs::STREAM_CHANNEL_0_PORT)
        .unwrap_or(0) as u16;
    let packet_size = backend
        .read_register(regs::STREAM_CHANNEL_0_PACKET_SIZE)
        .unwrap_or(0)
        & 0xFFFF;

    if let Some(mac) = multicast_mac(ip) {
        info!(
            %ip, port, packet_size,
            mac = %mac.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":"),
            "stream destination reconfigured (multicast)"
        );
    } else {
        info!(%ip, port, packet_size, "stream destination reconfigured");
    }
    backend.stream_config_changed(ip, port, packet_size);
}

/// Handle one inbound datagram to completion: evaluate the controller state
/// machine, parse and apply the command, build the ack, then send it after
/// releasing the backend lock.
async fn handle_datagram(bytes: &[u8], source: SocketAddr, state: &Mutex<SharedState>, sockets: &SocketSet) {
    let now = Instant::now();

    let ack: Option<Bytes> = {
        let mut guard = state.lock().unwrap();
        let SharedState { backend, controller } = &mut *guard;
        let backend = backend.as_mut();

        let timeout = heartbeat_timeout(backend);
        let write_access = controller.admit(source, now, timeout, backend);

        let parsed = match codec::parse_command(bytes) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return,
            Err(err) => {
                warn!(%err, %source, "malformed GVCP packet");
                return;
            }
        };
        let (header, command) = parsed;
        trace!(?command, packet_id = header.packet_id, %source, write_access, "handling GVCP command");

        let ack = match command {
            Command::Discovery => {
                let data = backend
                    .read_memory(regs::DISCOVERY_DATA, regs::DISCOVERY_DATA_SIZE)
                    .unwrap_or_else(|_| vec![0u8; regs::DISCOVERY_DATA_SIZE]);
                codec::build_discovery_ack(header.packet_id, &data)
            }
            Command::ReadMemory { address, size } => {
                let data = backend
                    .read_memory(address, size as usize)
                    .unwrap_or_else(|_| vec![0u8; size as usize]);
                codec::build_read_memory_ack(header.packet_id, address, &data)
            }
            Command::WriteMemory { address, data } => {
                if write_access {
                    if let Err(err) = backend.write_memory(address, &data) {
                        warn!(%err, address, "write_memory failed");
                    }
                }
                codec::build_write_memory_ack(header.packet_id, address)
            }
            Command::ReadRegister { address } => {
                let value = backend.read_register(address).unwrap_or(0);
                if address == regs::CONTROL_CHANNEL_PRIVILEGE {
                    controller.refresh_heartbeat(source, now);
                }
                codec::build_read_register_ack(header.packet_id, value)
            }
            Command::WriteRegister { address, value } => {
                let mut stream_changed = false;
                if write_access {
                    if let Err(err) = backend.write_register(address, value) {
                        warn!(%err, address, "write_register failed");
                    } else if is_stream_channel_0_register(address) {
                        stream_changed = true;
                    }
                }
                if stream_changed {
                    notify_stream_config_changed(backend);
                }
                // The source's "number of writes succeeded" field is 1 even
                // on a denied write; see DESIGN.md for the open-question
                // decision.
                codec::build_write_register_ack(header.packet_id, 1)
            }
        };

        let privilege = backend
            .read_register(regs::CONTROL_CHANNEL_PRIVILEGE)
            .unwrap_or(0);
        controller.settle(source, now, privilege);

        Some(ack)
    };

    if let Some(ack) = ack {
        if let Err(err) = sockets.send_ack(&ack, source).await {
            warn!(%err, %source, "failed to send GVCP ack");
        }
    }
}

/// Run the GVCP receive loop until `cancel` is set. Consumes datagrams from
/// `sockets`, applies them to `state` under its mutex, and sends acks back
/// to their source.
pub async fn run(sockets: &SocketSet, state: &Mutex<SharedState>, cancel: &AtomicBool, poll_timeout: Duration) {
    while !cancel.load(Ordering::Relaxed) {
        match sockets.recv(poll_timeout, DISCOVERY_BUFFER).await {
            Ok(Some(datagram)) => {
                if !datagram.bytes.is_empty() {
                    handle_datagram(&datagram.bytes, datagram.source, state, sockets).await;
                }
            }
            Ok(None) => continue,
            Err(err) => {
                warn!(?err, "socket set recv error");
            }
        }
    }
}
