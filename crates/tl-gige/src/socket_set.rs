//! Socket set (C3): the inbound UDP sockets the engine multiplexes, plus the
//! sink form's outbound GVSP socket.
//!
//! Inbound sockets are built with the `socket2`-then-`UdpSocket::from_std`
//! pattern already used for the client-side event channel, so
//! `SO_REUSEADDR` can be controlled per socket — something
//! `tokio::net::UdpSocket::bind` alone cannot express.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::warn;

use crate::gvcp::consts::PORT as GVCP_PORT;
use crate::nic::Iface;

/// One received datagram plus its source address.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    pub source: SocketAddr,
}

fn bind_udp(addr: SocketAddr, reuse_address: bool) -> io::Result<UdpSocket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if reuse_address {
        socket.set_reuse_address(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// The inbound socket set: primary GVCP, global-broadcast discovery, and
/// subnet-broadcast discovery. A socket that failed to bind is simply
/// absent; an entirely empty set is a fatal start error.
pub struct SocketSet {
    primary: Option<UdpSocket>,
    global_broadcast: Option<UdpSocket>,
    subnet_broadcast: Option<UdpSocket>,
}

impl SocketSet {
    /// Bind the inbound socket set for `iface`. A failure to bind the
    /// primary GVCP socket is fatal and propagated; discovery socket
    /// failures are logged and the set proceeds without them.
    pub fn bind(iface: &Iface) -> io::Result<Self> {
        let local_addr = SocketAddr::new(IpAddr::V4(iface.ip), GVCP_PORT);
        let primary = Some(bind_udp(local_addr, false)?);

        let global_broadcast_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), GVCP_PORT);
        let global_broadcast = if local_addr == global_broadcast_addr {
            None
        } else {
            match bind_udp(global_broadcast_addr, true) {
                Ok(sock) => Some(sock),
                Err(err) => {
                    warn!(?err, "failed to bind global-broadcast discovery socket");
                    None
                }
            }
        };

        let subnet_broadcast_addr =
            SocketAddr::new(IpAddr::V4(iface.broadcast_addr()), GVCP_PORT);
        let subnet_broadcast = if local_addr == subnet_broadcast_addr {
            None
        } else {
            match bind_udp(subnet_broadcast_addr, false) {
                Ok(sock) => Some(sock),
                Err(err) => {
                    warn!(?err, "failed to bind subnet-broadcast discovery socket");
                    None
                }
            }
        };

        if primary.is_none() && global_broadcast.is_none() && subnet_broadcast.is_none() {
            return Err(io::Error::other("no inbound GVCP socket could be bound"));
        }

        Ok(Self {
            primary,
            global_broadcast,
            subnet_broadcast,
        })
    }

    /// Wait up to `timeout` for a datagram on any bound socket. Returns
    /// `Ok(None)` on timeout or a spurious wakeup; callers simply loop.
    pub async fn recv(&self, timeout: Duration, buf_size: usize) -> io::Result<Option<Datagram>> {
        let wait = async {
            tokio::select! {
                res = recv_branch(self.primary.as_ref(), buf_size) => res,
                res = recv_branch(self.global_broadcast.as_ref(), buf_size) => res,
                res = recv_branch(self.subnet_broadcast.as_ref(), buf_size) => res,
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok((bytes, source))) => Ok(Some(Datagram { bytes, source })),
            Ok(Err(err)) => Err(err),
            Err(_) => Ok(None),
        }
    }

    /// Local address of the primary GVCP socket, when bound.
    pub fn primary_local_addr(&self) -> io::Result<SocketAddr> {
        self.primary
            .as_ref()
            .ok_or_else(|| io::Error::other("primary GVCP socket not bound"))?
            .local_addr()
    }

    /// Send an ack from the primary GVCP socket. Acks must originate from
    /// `(device_ip, GVCP_PORT)` so a client that `connect()`-ed its control
    /// socket to that address still accepts the reply — a connected UDP
    /// socket filters on source address.
    pub async fn send_ack(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.primary
            .as_ref()
            .ok_or_else(|| io::Error::other("primary GVCP socket not bound"))?
            .send_to(buf, dest)
            .await
    }
}

async fn recv_branch(sock: Option<&UdpSocket>, buf_size: usize) -> io::Result<(Vec<u8>, SocketAddr)> {
    match sock {
        Some(sock) => {
            let mut buf = vec![0u8; buf_size];
            let (len, src) = sock.recv_from(&mut buf).await?;
            buf.truncate(len);
            Ok((buf, src))
        }
        None => std::future::pending().await,
    }
}

/// Bind the sink form's outbound-only GVSP socket: blocking, ephemeral
/// port, on the local IP of `iface`. Blocking sends give the pipeline
/// natural backpressure, per the concurrency design.
pub fn bind_gvsp_socket(iface: &Iface) -> io::Result<std::net::UdpSocket> {
    std::net::UdpSocket::bind(SocketAddr::new(IpAddr::V4(iface.ip), 0))
}

#[cfg(test)]
impl SocketSet {
    /// Build a set around a single already-bound socket, for tests that
    /// need deterministic ephemeral ports rather than the fixed GVCP port.
    pub(crate) fn single(sock: UdpSocket) -> Self {
        Self {
            primary: Some(sock),
            global_broadcast: None,
            subnet_broadcast: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn recv_times_out_quietly_when_idle() {
        let sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let set = SocketSet::single(sock);
        let result = set.recv(Duration::from_millis(20), 64).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn recv_returns_datagram_and_source() {
        let sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let local = sock.local_addr().unwrap();
        let set = SocketSet::single(sock);

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let sender_addr = sender.local_addr().unwrap();
        sender.send_to(b"hello", local).await.unwrap();

        let datagram = set
            .recv(Duration::from_millis(500), 64)
            .await
            .unwrap()
            .expect("datagram");
        assert_eq!(&datagram.bytes, b"hello");
        assert_eq!(datagram.source, sender_addr);
    }
}
