//! UDP STUN client: one Binding exchange per query.

use crate::codec::{MappedAddress, TransactionId, decode_binding_response, encode_binding_request};
use crate::error::{InvalidServerAddress, StunError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Default per-query timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Receive buffer for one response datagram
const RECV_BUFFER_SIZE: usize = 1024;

/// STUN server given as `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StunServerAddress {
    /// Host name or IPv4 literal
    pub host: String,
    /// UDP port
    pub port: u16,
}

impl StunServerAddress {
    /// Create a server address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve to the first IPv4 socket address
    ///
    /// # Errors
    ///
    /// Returns `StunError::Resolve` if the lookup fails or yields no IPv4 address.
    pub async fn resolve(&self) -> Result<SocketAddrV4, StunError> {
        if let Ok(ip) = self.host.parse::<Ipv4Addr>() {
            return Ok(SocketAddrV4::new(ip, self.port));
        }

        let addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|_| StunError::Resolve(self.to_string()))?;

        addrs
            .filter_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(v4),
                SocketAddr::V6(_) => None,
            })
            .next()
            .ok_or_else(|| StunError::Resolve(self.to_string()))
    }
}

impl FromStr for StunServerAddress {
    type Err = InvalidServerAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidServerAddress(s.to_string());

        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if host.is_empty() || port == 0 {
            return Err(invalid());
        }

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for StunServerAddress {
    type Error = InvalidServerAddress;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StunServerAddress> for String {
    fn from(addr: StunServerAddress) -> Self {
        addr.to_string()
    }
}

impl From<SocketAddrV4> for StunServerAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for StunServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// STUN client bound to one local UDP socket
///
/// Every query uses a fresh transaction ID. The client is not retried
/// internally; callers decide whether to try another server.
pub struct StunClient {
    socket: UdpSocket,
}

impl StunClient {
    /// Bind a new STUN client to a local address
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound
    pub async fn bind(addr: SocketAddr) -> Result<Self, StunError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    /// Bind to `0.0.0.0:port`; port 0 picks an ephemeral port
    ///
    /// # Errors
    ///
    /// Returns an error if the port is in use
    pub async fn bind_port(port: u16) -> Result<Self, StunError> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
    }

    /// Wrap an existing socket
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }

    /// Get local socket address
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be determined
    pub fn local_addr(&self) -> Result<SocketAddr, StunError> {
        Ok(self.socket.local_addr()?)
    }

    /// Release the underlying socket
    #[must_use]
    pub fn into_socket(self) -> UdpSocket {
        self.socket
    }

    /// Resolve `server` and perform one Binding exchange
    ///
    /// Resolution counts against `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `StunError` if:
    /// - the server cannot be resolved to IPv4
    /// - no response arrives within `timeout`
    /// - the response fails to decode
    pub async fn query(
        &self,
        server: &StunServerAddress,
        timeout: Duration,
    ) -> Result<MappedAddress, StunError> {
        tokio::time::timeout(timeout, async {
            let addr = server.resolve().await?;
            self.exchange(addr).await
        })
        .await
        .map_err(|_| StunError::Timeout(timeout))?
    }

    /// Perform one Binding exchange with an already resolved server
    ///
    /// # Errors
    ///
    /// Same as [`query`](Self::query), minus resolution.
    pub async fn query_addr(
        &self,
        server: SocketAddrV4,
        timeout: Duration,
    ) -> Result<MappedAddress, StunError> {
        tokio::time::timeout(timeout, self.exchange(server))
            .await
            .map_err(|_| StunError::Timeout(timeout))?
    }

    async fn exchange(&self, server: SocketAddrV4) -> Result<MappedAddress, StunError> {
        let transaction_id = TransactionId::random();
        let request = encode_binding_request(&transaction_id);

        tracing::debug!("STUN binding request {} -> {}", transaction_id, server);
        self.socket.send_to(&request, SocketAddr::V4(server)).await?;

        // Exactly one datagram is awaited; its source is not checked
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;

        let mapped = decode_binding_response(&buf[..len], &transaction_id)?;
        tracing::debug!("STUN binding response from {}: mapped {}", from, mapped);
        Ok(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AddressAttribute, StunMessage, encode_binding_success};

    /// Loopback responder that answers one request with the sender's address
    async fn spawn_responder(tamper: bool) -> SocketAddrV4 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = match socket.local_addr().unwrap() {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => unreachable!(),
        };

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, from) = socket.recv_from(&mut buf).await.unwrap();
            let request = StunMessage::parse(&buf[..len]).unwrap();
            let tid = if tamper {
                TransactionId::from_bytes([0xEE; 12])
            } else {
                request.transaction_id
            };
            let SocketAddr::V4(from) = from else {
                unreachable!()
            };
            let response = encode_binding_success(&tid, from.into(), AddressAttribute::XorMapped);
            socket.send_to(&response, from).await.unwrap();
        });

        addr
    }

    #[test]
    fn test_server_address_parse() {
        let addr: StunServerAddress = "stun.l.google.com:19302".parse().unwrap();
        assert_eq!(addr.host, "stun.l.google.com");
        assert_eq!(addr.port, 19302);
        assert_eq!(addr.to_string(), "stun.l.google.com:19302");
    }

    #[test]
    fn test_server_address_parse_invalid() {
        for input in ["stun.example.com", ":3478", "host:0", "host:notaport", "host:70000"] {
            assert!(
                input.parse::<StunServerAddress>().is_err(),
                "{input} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_resolve_ipv4_literal() {
        let addr = StunServerAddress::new("192.0.2.10", 3478);
        assert_eq!(
            addr.resolve().await.unwrap(),
            SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 10), 3478)
        );
    }

    #[tokio::test]
    async fn test_stun_client_bind() {
        let client = StunClient::bind_port(0).await.unwrap();
        assert_ne!(client.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_query_loopback_responder() {
        let server = spawn_responder(false).await;
        let client = StunClient::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let local = client.local_addr().unwrap();

        let mapped = client
            .query(&StunServerAddress::from(server), Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(mapped.socket_addr(), local);
    }

    #[tokio::test]
    async fn test_query_transaction_mismatch() {
        let server = spawn_responder(true).await;
        let client = StunClient::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let result = client.query_addr(server, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(StunError::TransactionMismatch)));
    }

    #[tokio::test]
    async fn test_query_timeout() {
        // Bound but never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let SocketAddr::V4(server) = silent.local_addr().unwrap() else {
            unreachable!()
        };

        let client = StunClient::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let timeout = Duration::from_millis(100);
        let result = client.query_addr(server, timeout).await;

        assert!(matches!(result, Err(StunError::Timeout(t)) if t == timeout));
    }
}
