//! Loopback fixtures for natlink integration tests
//!
//! A STUN responder whose reported mapping is chosen by the test stands in for
//! a server behind a particular NAT, and a punch peer stands in for a remote
//! node that answers late or never.

use natlink_stun::{AddressAttribute, MappedAddress, StunMessage, encode_binding_success};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Documentation address used as the simulated public IP
pub const PUBLIC_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);

/// IPv4 view of a socket address; loopback fixtures are IPv4 only
///
/// # Panics
///
/// Panics on an IPv6 address.
pub fn v4(addr: SocketAddr) -> SocketAddrV4 {
    match addr {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(addr) => panic!("unexpected IPv6 address {addr}"),
    }
}

/// Ephemeral loopback bind address
pub fn loopback() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
}

/// Loopback STUN server answering every Binding Request
///
/// `mapping` decides what the client is told its public endpoint is.
pub struct StunResponder {
    addr: SocketAddrV4,
    task: JoinHandle<()>,
}

impl StunResponder {
    /// Answer each request with whatever `mapping` returns for its source
    pub async fn spawn<F>(mapping: F) -> Self
    where
        F: Fn(SocketAddrV4) -> MappedAddress + Send + 'static,
    {
        let socket = UdpSocket::bind(loopback()).await.unwrap();
        let addr = v4(socket.local_addr().unwrap());

        let task = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    continue;
                };
                let Ok(request) = StunMessage::parse(&buf[..len]) else {
                    continue;
                };
                let from = v4(from);
                let mapped = mapping(from);
                tracing::debug!("Responder {} mapping {} to {}", addr, from, mapped);

                let response = encode_binding_success(
                    &request.transaction_id,
                    mapped,
                    AddressAttribute::XorMapped,
                );
                let _ = socket.send_to(&response, SocketAddr::V4(from)).await;
            }
        });

        Self { addr, task }
    }

    /// Report the true source address (no NAT in the path)
    pub async fn reflecting() -> Self {
        Self::spawn(MappedAddress::from).await
    }

    /// Report the same public endpoint for every client (full cone NAT)
    pub async fn fixed(endpoint: MappedAddress) -> Self {
        Self::spawn(move |_| endpoint).await
    }

    /// Server address
    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    /// `host:port` form for configuration
    pub fn server(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for StunResponder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Remote node that ignores probes until the `answer_from`-th arrives
///
/// It then answers with a probe of its own, the way a peer running its own
/// session would. The handle yields how many probes it saw.
pub async fn late_peer(answer_from: u32) -> (SocketAddrV4, JoinHandle<u32>) {
    let socket = UdpSocket::bind(loopback()).await.unwrap();
    let addr = v4(socket.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let mut seen = 0;
        loop {
            let (len, from) = socket.recv_from(&mut buf).await.unwrap();
            if buf[..len].starts_with(b"NLPUNCH") && !buf[..len].starts_with(b"NLPUNCH_ACK") {
                seen += 1;
                if seen >= answer_from {
                    let mut probe = b"NLPUNCH".to_vec();
                    probe.extend_from_slice(&0u32.to_be_bytes());
                    socket.send_to(&probe, from).await.unwrap();
                    return seen;
                }
            }
        }
    });

    (addr, handle)
}

/// Bound socket that never answers
pub async fn silent_peer() -> (SocketAddrV4, UdpSocket) {
    let socket = UdpSocket::bind(loopback()).await.unwrap();
    let addr = v4(socket.local_addr().unwrap());
    (addr, socket)
}

/// Silent sockets on every loopback port within `radius` of a centre port
///
/// Port guessing around the centre then only ever reaches sockets the test
/// owns. Returns the centre address and every socket, centre first.
pub async fn silent_neighbourhood(radius: u16) -> (SocketAddrV4, Vec<UdpSocket>) {
    for _ in 0..64 {
        let (centre, socket) = silent_peer().await;
        let mut sockets = vec![socket];

        let low = centre.port().saturating_sub(radius);
        let high = centre.port().saturating_add(radius);
        for port in (low..=high).filter(|port| *port != centre.port()) {
            match UdpSocket::bind((Ipv4Addr::LOCALHOST, port)).await {
                Ok(neighbour) => sockets.push(neighbour),
                Err(_) => break,
            }
        }

        if sockets.len() == usize::from(high - low) + 1 {
            return (centre, sockets);
        }
    }
    panic!("no free block of {} loopback ports", 2 * radius + 1);
}
