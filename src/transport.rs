//! UDP multicast transport (§6 "Transport dependency"). Out of scope for the
//! scanner core proper but shipped as its concrete collaborator: one socket
//! per usable interface, joined to the mDNS multicast groups, grounded on
//! `mdns2/protocol.rs`'s socket setup and `mdns.rs`'s per-interface IPv6
//! fan-out.

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;

use socket2::{Domain, Protocol, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::config::{MDNS_ADDR_V4, MDNS_ADDR_V6, MDNS_PORT, ScannerConfig};

/// A datagram as delivered to the Message Correlator (§4.6): raw bytes plus
/// the remote address and the local interface it arrived on (needed for
/// link-local address tagging, §4.3).
#[derive(Debug, Clone)]
pub struct InboundDatagram {
    pub bytes: Vec<u8>,
    pub remote: std::net::SocketAddr,
    pub interface: String,
}

/// The scanner's view of its network collaborator (§6). `send` returns a
/// `Future` exactly as specified, so a genuine socket failure propagates to
/// whichever broadcast attempt produced it (*TransportSendFailure*, §7).
pub trait Transport: Send + Sync + 'static {
    fn send(&self, bytes: &[u8]) -> impl Future<Output = std::io::Result<()>> + Send;
    fn close(&self) -> impl Future<Output = ()> + Send;
}

struct McastSocket {
    sock: Arc<UdpSocket>,
    multicast_addr: String,
}

/// Production transport: one socket for IPv4, one per IPv6-capable
/// interface, all joined to the Matter mDNS multicast groups.
pub struct UdpMulticastTransport {
    sockets: Vec<McastSocket>,
    cancel: CancellationToken,
}

fn create_multicast_socket_v4() -> anyhow::Result<std::net::UdpSocket> {
    let sock = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    sock.set_reuse_port(true)?;
    let addr: SocketAddrV4 = format!("0.0.0.0:{MDNS_PORT}").parse()?;
    sock.bind(&socket2::SockAddr::from(addr))?;
    let maddr: Ipv4Addr = MDNS_ADDR_V4.parse()?;
    sock.join_multicast_v4(&maddr, &Ipv4Addr::UNSPECIFIED)?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}

fn create_multicast_socket_v6(interface: u32) -> anyhow::Result<std::net::UdpSocket> {
    let sock = socket2::Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    sock.set_reuse_port(true)?;
    let addr: SocketAddrV6 = format!("[::]:{MDNS_PORT}").parse()?;
    sock.bind(&socket2::SockAddr::from(addr))?;
    let maddr: Ipv6Addr = MDNS_ADDR_V6.parse()?;
    sock.join_multicast_v6(&maddr, interface)?;
    sock.set_multicast_if_v6(interface)?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}

fn interface_name_for(idx: u32, ifaces: &[if_addrs::Interface]) -> String {
    ifaces
        .iter()
        .find(|i| i.index == Some(idx))
        .map(|i| i.name.clone())
        .unwrap_or_else(|| idx.to_string())
}

impl UdpMulticastTransport {
    /// Create sockets for every usable interface (or just `config.net_interface`
    /// when set) and spawn the receive loops. Returns the transport (for
    /// sending) and a channel the engine reads inbound datagrams from.
    pub async fn new(
        config: &ScannerConfig,
    ) -> anyhow::Result<(Self, UnboundedReceiver<InboundDatagram>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut sockets = Vec::new();

        match create_multicast_socket_v4() {
            Ok(std_sock) => match UdpSocket::from_std(std_sock) {
                Ok(s) => sockets.push(McastSocket {
                    sock: Arc::new(s),
                    multicast_addr: format!("{MDNS_ADDR_V4}:{MDNS_PORT}"),
                }),
                Err(e) => log::warn!("mdns scanner: failed to wrap v4 socket: {e}"),
            },
            Err(e) => log::warn!("mdns scanner: failed to create v4 socket: {e}"),
        }

        let ifaces = if_addrs::get_if_addrs().unwrap_or_default();
        let mut seen = std::collections::HashSet::new();
        for iface in &ifaces {
            if !iface.ip().is_ipv6() {
                continue;
            }
            if let Some(restrict) = &config.net_interface {
                if &iface.name != restrict {
                    continue;
                }
            }
            let Some(idx) = iface.index else { continue };
            if !seen.insert(idx) {
                continue;
            }
            match create_multicast_socket_v6(idx) {
                Ok(std_sock) => match UdpSocket::from_std(std_sock) {
                    Ok(s) => sockets.push(McastSocket {
                        sock: Arc::new(s),
                        multicast_addr: format!("[{MDNS_ADDR_V6}]:{MDNS_PORT}"),
                    }),
                    Err(e) => log::debug!("mdns scanner: failed to wrap v6 socket idx={idx}: {e}"),
                },
                Err(e) => log::debug!("mdns scanner: failed to create v6 socket idx={idx}: {e}"),
            }
        }

        if sockets.is_empty() {
            anyhow::bail!("no multicast sockets could be created");
        }

        for ms in &sockets {
            let sock = ms.sock.clone();
            let tx = tx.clone();
            let cancel = cancel.child_token();
            let ifaces = ifaces.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 9000];
                loop {
                    let (n, remote) = tokio::select! {
                        r = sock.recv_from(&mut buf) => match r {
                            Ok(v) => v,
                            Err(e) => {
                                log::debug!("mdns scanner: recv error: {e}");
                                continue;
                            }
                        },
                        _ = cancel.cancelled() => return,
                    };
                    let interface = match remote {
                        std::net::SocketAddr::V6(ref v6) if v6.scope_id() != 0 => {
                            interface_name_for(v6.scope_id(), &ifaces)
                        }
                        _ => String::new(),
                    };
                    let _ = tx.send(InboundDatagram {
                        bytes: buf[..n].to_vec(),
                        remote,
                        interface,
                    });
                }
            });
        }

        Ok((Self { sockets, cancel }, rx))
    }
}

impl Transport for UdpMulticastTransport {
    async fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut last_err = None;
        let mut any_ok = false;
        for ms in &self.sockets {
            match ms.sock.send_to(bytes, ms.multicast_addr.as_str()).await {
                Ok(_) => any_ok = true,
                Err(e) => last_err = Some(e),
            }
        }
        if any_ok {
            Ok(())
        } else {
            Err(last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotConnected, "no sockets")
            }))
        }
    }

    async fn close(&self) {
        self.cancel.cancel();
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    //! In-memory transport: `send` records outbound bytes, inbound datagrams
    //! are injected through the paired sender. Lets §8 scenario tests drive
    //! the scanner without real sockets.
    use super::*;
    use tokio::sync::Mutex;

    pub struct MockTransport {
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl MockTransport {
        pub fn new() -> (
            Self,
            UnboundedSender<InboundDatagram>,
            UnboundedReceiver<InboundDatagram>,
        ) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    sent: Arc::new(Mutex::new(Vec::new())),
                },
                tx,
                rx,
            )
        }
    }

    impl Transport for MockTransport {
        async fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
            self.sent.lock().await.push(bytes.to_vec());
            Ok(())
        }

        async fn close(&self) {}
    }
}
