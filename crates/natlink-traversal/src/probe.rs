//! Binding probe seam between classification and the network.

use crate::behavior::LocalBinding;
use async_trait::async_trait;
use natlink_stun::{MappedAddress, StunClient, StunError, StunServerAddress};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Answer to a single binding probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReply {
    /// Local address the probe was sent from
    pub local: SocketAddr,
    /// Mapped address reported by the server
    pub mapped: MappedAddress,
}

/// A local port kept bound across queries
///
/// The port is released when the value is dropped, so every query made
/// through one `BoundProbe` leaves from the same local port.
#[async_trait]
pub trait BoundProbe: Send + Sync {
    /// Local port held by this binding
    fn local_port(&self) -> u16;

    /// Query `server` from the held port, bounded by `timeout`
    ///
    /// # Errors
    ///
    /// Returns the underlying `StunError` when the query fails.
    async fn query(
        &self,
        server: &StunServerAddress,
        timeout: Duration,
    ) -> Result<ProbeReply, StunError>;
}

/// STUN Binding exchanges from chosen local ports
///
/// The classifier and the symmetric detector only talk to the network through
/// this trait, so tests can script the NAT's answers.
#[async_trait]
pub trait BindingProbe: Send + Sync {
    /// Bind a local port and hold it until the returned value is dropped
    ///
    /// # Errors
    ///
    /// Returns `StunError::Io` when the port cannot be bound.
    async fn bind(&self, binding: LocalBinding) -> Result<Box<dyn BoundProbe>, StunError>;

    /// Bind, query `server` once and release the port
    ///
    /// # Errors
    ///
    /// Returns the underlying `StunError` when binding or the query fails.
    async fn probe(
        &self,
        binding: LocalBinding,
        server: &StunServerAddress,
        timeout: Duration,
    ) -> Result<ProbeReply, StunError> {
        let bound = self.bind(binding).await?;
        bound.query(server, timeout).await
    }
}

/// Probe over real UDP sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpProbe;

impl UdpProbe {
    /// Create a UDP probe
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BindingProbe for UdpProbe {
    async fn bind(&self, binding: LocalBinding) -> Result<Box<dyn BoundProbe>, StunError> {
        let port = match binding {
            LocalBinding::Ephemeral => 0,
            LocalBinding::Port(port) => port,
        };

        let client = StunClient::bind_port(port).await?;
        let port = client.local_addr()?.port();
        Ok(Box::new(UdpBinding { client, port }))
    }
}

/// `StunClient` held open by [`UdpProbe::bind`]
struct UdpBinding {
    client: StunClient,
    port: u16,
}

#[async_trait]
impl BoundProbe for UdpBinding {
    fn local_port(&self) -> u16 {
        self.port
    }

    async fn query(
        &self,
        server: &StunServerAddress,
        timeout: Duration,
    ) -> Result<ProbeReply, StunError> {
        let (target, mapped) = within(timeout, async {
            let target = server.resolve().await?;
            let mapped = self.client.query_addr(target, timeout).await?;
            Ok::<_, StunError>((target, mapped))
        })
        .await?;

        let ip = route_ip(target).await.unwrap_or(Ipv4Addr::UNSPECIFIED);
        Ok(ProbeReply {
            local: SocketAddr::new(IpAddr::V4(ip), self.port),
            mapped,
        })
    }
}

/// Run `work` under a single `timeout`, however many steps it awaits
async fn within<T>(
    timeout: Duration,
    work: impl Future<Output = Result<T, StunError>>,
) -> Result<T, StunError> {
    tokio::time::timeout(timeout, work)
        .await
        .map_err(|_| StunError::Timeout(timeout))?
}

/// Local interface address the OS would use to reach `target`
///
/// A connected UDP socket sends nothing, it only resolves the route.
pub async fn route_ip(target: SocketAddrV4) -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
    socket.connect(target).await.ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    //! Scripted probe used by classifier and detector tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        answers: Mutex<VecDeque<Result<MappedAddress, ()>>>,
        calls: AtomicUsize,
        binds: AtomicUsize,
        held: Mutex<Vec<u16>>,
        queries: Mutex<Vec<(u16, String)>>,
    }

    /// Answers from a fixed queue and records every bind and query
    ///
    /// Binding a port that is still held fails the way the OS would.
    pub struct ScriptedProbe {
        local: SocketAddr,
        script: Arc<Script>,
        delay: Duration,
        same_port: bool,
    }

    impl ScriptedProbe {
        pub fn new(local: SocketAddr, answers: Vec<Result<MappedAddress, ()>>) -> Self {
            let script = Script {
                answers: Mutex::new(answers.into()),
                ..Script::default()
            };
            Self {
                local,
                script: Arc::new(script),
                delay: Duration::ZERO,
                same_port: false,
            }
        }

        /// Wait `delay` before every answer
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Hand out the same port for every ephemeral bind
        pub fn same_port(mut self) -> Self {
            self.same_port = true;
            self
        }

        /// Queries issued
        pub fn calls(&self) -> usize {
            self.script.calls.load(Ordering::SeqCst)
        }

        /// Ports bound
        pub fn binds(&self) -> usize {
            self.script.binds.load(Ordering::SeqCst)
        }

        /// `(local port, server)` of every query, in order
        pub fn queries(&self) -> Vec<(u16, String)> {
            self.script.queries.lock().unwrap().clone()
        }

        pub fn push(&self, answer: Result<MappedAddress, ()>) {
            self.script.answers.lock().unwrap().push_back(answer);
        }
    }

    #[async_trait]
    impl BindingProbe for ScriptedProbe {
        async fn bind(&self, binding: LocalBinding) -> Result<Box<dyn BoundProbe>, StunError> {
            let index = self.script.binds.fetch_add(1, Ordering::SeqCst);
            let port = match binding {
                LocalBinding::Ephemeral if self.same_port => self.local.port(),
                // Each ephemeral bind gets a new port
                LocalBinding::Ephemeral => self.local.port() + index as u16,
                LocalBinding::Port(port) => {
                    if self.script.held.lock().unwrap().contains(&port) {
                        return Err(StunError::Io(std::io::ErrorKind::AddrInUse.into()));
                    }
                    port
                }
            };
            self.script.held.lock().unwrap().push(port);

            Ok(Box::new(ScriptedBinding {
                local: SocketAddr::new(self.local.ip(), port),
                script: Arc::clone(&self.script),
                delay: self.delay,
            }))
        }
    }

    struct ScriptedBinding {
        local: SocketAddr,
        script: Arc<Script>,
        delay: Duration,
    }

    #[async_trait]
    impl BoundProbe for ScriptedBinding {
        fn local_port(&self) -> u16 {
            self.local.port()
        }

        async fn query(
            &self,
            server: &StunServerAddress,
            timeout: Duration,
        ) -> Result<ProbeReply, StunError> {
            self.script.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .queries
                .lock()
                .unwrap()
                .push((self.local.port(), server.to_string()));

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let answer = self.script.answers.lock().unwrap().pop_front();
            match answer {
                Some(Ok(mapped)) => Ok(ProbeReply {
                    local: self.local,
                    mapped,
                }),
                Some(Err(())) | None => Err(StunError::Timeout(timeout)),
            }
        }
    }

    impl Drop for ScriptedBinding {
        fn drop(&mut self) {
            let mut held = self.script.held.lock().unwrap();
            if let Some(at) = held.iter().position(|port| *port == self.local.port()) {
                held.swap_remove(at);
            }
        }
    }
}
