//! UDP transport -- broadcast sends and the datagram receive loop.
//!
//! Three pieces:
//!   1. `Broadcaster`: one socket per address family, best-effort fan-out.
//!   2. Sender loop: drains `Outbound` commands from the coordinator.
//!   3. Listener loop: decodes datagrams and hands each one to the
//!      coordinator without waiting for its round to finish.
//!
//! Listening on `[::]` covers IPv4 only where the host defaults to
//! `IPV6_V6ONLY=0`. `bind_listeners` therefore also tries an IPv4 socket on
//! the same port: a dual-stack host refuses it as already in use, a v6-only
//! host accepts it and the node listens on both.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use futures_util::StreamExt;
use lanfolder_protocol::{DatagramCodec, Message};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio_util::udp::UdpFramed;

use crate::coordinator::Coordinator;
use crate::transfer::FileTransfer;

/// Commands from the coordinator to the socket owner.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Send to every configured announce target.
    Broadcast(Message),
    /// Point-to-point, from the listener socket.
    Reply { to: SocketAddr, message: Message },
}

/// Per-call delivery summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub sent: usize,
    pub failed: usize,
}

/// One UDP socket per address family for outbound broadcast/multicast.
pub struct Broadcaster {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
}

impl Broadcaster {
    /// Bind both families. When the listener is bound to a specific address
    /// the matching family binds to it too, so peers see the same source IP.
    /// A family that cannot bind is skipped.
    pub async fn bind(listen_ip: IpAddr) -> Self {
        let v4_ip = match listen_ip {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        let v6_ip = match listen_ip {
            IpAddr::V6(ip) => ip,
            IpAddr::V4(_) => Ipv6Addr::UNSPECIFIED,
        };

        let v4 = match UdpSocket::bind((v4_ip, 0)).await {
            Ok(sock) => {
                // Required for broadcast destinations, harmless for unicast.
                if let Err(e) = sock.set_broadcast(true) {
                    tracing::warn!("transport: cannot enable broadcast: {e}");
                }
                Some(sock)
            }
            Err(e) => {
                tracing::warn!("transport: no IPv4 send socket: {e}");
                None
            }
        };
        let v6 = match UdpSocket::bind((v6_ip, 0)).await {
            Ok(sock) => Some(sock),
            Err(e) => {
                tracing::warn!("transport: no IPv6 send socket: {e}");
                None
            }
        };
        Self { v4, v6 }
    }

    /// Send `payload` to every destination. A failure for one destination
    /// never stops the others.
    pub async fn send(&self, payload: &[u8], dests: &[SocketAddr]) -> SendReport {
        let mut report = SendReport::default();
        for dest in dests {
            let sock = match dest {
                SocketAddr::V4(_) => self.v4.as_ref(),
                SocketAddr::V6(_) => self.v6.as_ref(),
            };
            let Some(sock) = sock else {
                report.failed += 1;
                continue;
            };
            match sock.send_to(payload, dest).await {
                Ok(_) => report.sent += 1,
                Err(e) => {
                    tracing::debug!(%dest, "transport: send failed: {e}");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Bind the listening sockets for `addr`. The first socket is always
/// present; a second IPv4 socket is added when a wildcard IPv6 bind does not
/// accept IPv4 traffic. If the host has no IPv6 at all, fall back to IPv4 on
/// the same port.
pub async fn bind_listeners(addr: SocketAddr) -> io::Result<Vec<UdpSocket>> {
    let wildcard_v6 = addr.ip() == IpAddr::V6(Ipv6Addr::UNSPECIFIED);
    let primary = match UdpSocket::bind(addr).await {
        Ok(sock) => sock,
        Err(e) if wildcard_v6 => {
            tracing::warn!("transport: IPv6 bind failed ({e}), falling back to IPv4");
            return Ok(vec![UdpSocket::bind((Ipv4Addr::UNSPECIFIED, addr.port())).await?]);
        }
        Err(e) => return Err(e),
    };
    if !wildcard_v6 {
        return Ok(vec![primary]);
    }

    let port = primary.local_addr()?.port();
    match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await {
        Ok(v4) => {
            tracing::info!(port, "transport: IPv6 socket is v6-only, listening on IPv4 separately");
            Ok(vec![primary, v4])
        }
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Ok(vec![primary]),
        Err(e) => {
            tracing::warn!(port, "transport: no separate IPv4 listener: {e}");
            Ok(vec![primary])
        }
    }
}

/// Pick the listener to reply from: one of the destination's family if
/// there is one, else the first, with the destination mapped to fit it.
fn reply_route(locals: &[SocketAddr], to: SocketAddr) -> Option<(usize, SocketAddr)> {
    let same_family = locals.iter().position(|l| l.is_ipv4() == to.is_ipv4());
    match same_family {
        Some(i) => Some((i, to)),
        None => locals.first().map(|l| (0, destination_for(*l, to))),
    }
}

/// IPv6 sockets need IPv4 destinations in mapped form.
fn destination_for(socket_local: SocketAddr, to: SocketAddr) -> SocketAddr {
    match (socket_local, to) {
        (SocketAddr::V6(_), SocketAddr::V4(v4)) => {
            SocketAddr::new(IpAddr::V6(v4.ip().to_ipv6_mapped()), v4.port())
        }
        _ => to,
    }
}

/// Drain outbound commands until shutdown.
pub async fn run_sender_loop(
    listeners: Vec<Arc<UdpSocket>>,
    broadcaster: Broadcaster,
    targets: Vec<SocketAddr>,
    mut rx: mpsc::Receiver<Outbound>,
    mut shutdown: broadcast::Receiver<()>,
) {
    // Index-aligned with `listeners`.
    let locals: Vec<SocketAddr> = listeners
        .iter()
        .map(|l| {
            l.local_addr()
                .unwrap_or(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0))
        })
        .collect();
    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::info!("outbound channel closed");
                    return;
                };
                match cmd {
                    Outbound::Broadcast(message) => {
                        let payload = match message.encode() {
                            Ok(p) => p,
                            Err(e) => {
                                tracing::warn!("transport: cannot encode broadcast: {e}");
                                continue;
                            }
                        };
                        let report = broadcaster.send(payload.as_bytes(), &targets).await;
                        tracing::debug!(
                            kind = message.kind().wire_name(),
                            sent = report.sent,
                            failed = report.failed,
                            "transport: broadcast sent"
                        );
                    }
                    Outbound::Reply { to, message } => {
                        let payload = match message.encode() {
                            Ok(p) => p,
                            Err(e) => {
                                tracing::warn!("transport: cannot encode reply: {e}");
                                continue;
                            }
                        };
                        let Some((i, dest)) = reply_route(&locals, to) else {
                            tracing::warn!(%to, "transport: no listener to reply from");
                            continue;
                        };
                        if let Err(e) = listeners[i].send_to(payload.as_bytes(), dest).await {
                            tracing::debug!(%to, "transport: reply failed: {e}");
                        }
                    }
                }
            }

            _ = shutdown.recv() => {
                tracing::info!("transport sender shutting down");
                return;
            }
        }
    }
}

/// Receive datagrams until shutdown, dispatching each decoded message as an
/// independent round.
pub async fn run_listener_loop<T: FileTransfer>(
    socket: Arc<UdpSocket>,
    coordinator: Arc<Coordinator<T>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut framed = UdpFramed::new(socket, DatagramCodec);

    loop {
        tokio::select! {
            next = framed.next() => {
                match next {
                    Some(Ok((message, from))) => {
                        tracing::debug!(
                            kind = message.kind().wire_name(),
                            peer = %message.peer_id(),
                            %from,
                            "transport: datagram received"
                        );
                        // Fire and forget: the round reports through the coordinator.
                        drop(coordinator.dispatch(message, from));
                    }
                    Some(Err(e)) => {
                        tracing::debug!("transport: dropped datagram: {e}");
                    }
                    None => {
                        tracing::info!("listener stream ended");
                        return;
                    }
                }
            }

            _ = shutdown.recv() => {
                tracing::info!("transport listener shutting down");
                return;
            }
        }
    }
}
