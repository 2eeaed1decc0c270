//! Hole-punch driver owning the UDP socket.

use super::machine::{PunchEvent, PunchMachine, PunchState, Step};
use super::{Packet, PunchStrategy};
use crate::config::TraversalConfig;
use crate::error::{HolePunchError, PunchFailure};
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};

/// Receive buffer for punch datagrams
const RECV_BUFFER_SIZE: usize = 1024;

/// Established peer-to-peer path
///
/// Owns the socket the hole was punched with; the NAT mapping only holds for
/// this local port.
#[derive(Debug)]
pub struct HolePunchOutcome {
    /// Always `Established`
    pub state: PunchState,
    /// Local socket address
    pub local: SocketAddr,
    /// Peer address that answered
    pub remote: SocketAddr,
    /// Strategy that succeeded
    pub strategy: PunchStrategy,
    /// Socket bound to `local`
    pub socket: UdpSocket,
}

impl HolePunchOutcome {
    /// Send a probe to keep the NAT binding alive
    ///
    /// Call periodically (every 15-30 seconds) while the path is idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet cannot be sent
    pub async fn keepalive(&self) -> io::Result<()> {
        self.socket
            .send_to(&Packet::Probe(0).encode(), self.remote)
            .await?;
        Ok(())
    }

    /// Take the socket
    #[must_use]
    pub fn into_socket(self) -> UdpSocket {
        self.socket
    }
}

/// Cancels a running [`HolePunchSession`]
///
/// Cancelling before `establish` is awaited ends the session on its first poll.
#[derive(Debug, Clone)]
pub struct PunchCanceller {
    notify: Arc<Notify>,
}

impl PunchCanceller {
    /// Request cancellation
    pub fn cancel(&self) {
        self.notify.notify_one();
    }
}

/// One hole-punch attempt toward one peer
///
/// The session exclusively owns its socket. [`establish`](Self::establish)
/// consumes the session, so the socket is either handed over in the outcome
/// or closed on return; dropping the future closes it too.
pub struct HolePunchSession {
    socket: UdpSocket,
    machine: PunchMachine,
    probe_period: Duration,
    ceiling: Duration,
    cancel: Arc<Notify>,
}

impl HolePunchSession {
    /// Bind a socket and prepare a session
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound
    pub async fn bind(
        local: SocketAddr,
        peer: SocketAddrV4,
        strategy: PunchStrategy,
        config: &TraversalConfig,
    ) -> Result<Self, HolePunchError> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self::from_socket(socket, peer, strategy, config))
    }

    /// Prepare a session on an existing socket
    #[must_use]
    pub fn from_socket(
        socket: UdpSocket,
        peer: SocketAddrV4,
        strategy: PunchStrategy,
        config: &TraversalConfig,
    ) -> Self {
        let (probe_period, ceiling) = match strategy {
            PunchStrategy::Direct => (config.probe_interval(), config.direct_timeout()),
            PunchStrategy::Cone => (config.probe_interval(), config.cone_ceiling()),
            PunchStrategy::SymmetricGuess => {
                (config.per_candidate_delay(), config.symmetric_ceiling())
            }
        };

        Self {
            socket,
            machine: PunchMachine::new(strategy, peer, &config.candidate_offsets),
            probe_period,
            ceiling,
            cancel: Arc::new(Notify::new()),
        }
    }

    /// Get local socket address
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be determined
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Strategy this session runs
    #[must_use]
    pub fn strategy(&self) -> PunchStrategy {
        self.machine.strategy()
    }

    /// Addresses a reply is accepted from
    #[must_use]
    pub fn candidates(&self) -> &[SocketAddrV4] {
        self.machine.candidates()
    }

    /// Handle for cancelling this session from another task
    #[must_use]
    pub fn canceller(&self) -> PunchCanceller {
        PunchCanceller {
            notify: Arc::clone(&self.cancel),
        }
    }

    /// Run the session to a terminal state
    ///
    /// Probes are answered with an acknowledgement so the remote side also
    /// sees an inbound datagram.
    ///
    /// # Errors
    ///
    /// - `Failed(Timeout)`: ceiling expired
    /// - `Failed(DirectUnreachable)`: single direct handshake unanswered
    /// - `Failed(NoCandidateResponded)`: no usable candidate port
    /// - `Cancelled`: cancelled through a [`PunchCanceller`]
    /// - `Io`: socket error other than an ICMP-induced reset
    pub async fn establish(self) -> Result<HolePunchOutcome, HolePunchError> {
        let Self {
            socket,
            mut machine,
            probe_period,
            ceiling,
            cancel,
        } = self;

        let local = socket.local_addr()?;
        tracing::debug!(
            "Hole punch from {} using {} ({} candidates, ceiling {:?})",
            local,
            machine.strategy(),
            machine.candidates().len(),
            ceiling
        );

        let started = Instant::now();
        let deadline = tokio::time::sleep_until(started + ceiling);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval_at(started + probe_period, probe_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        let mut step = machine.start();
        loop {
            match step {
                Step::Probe(target) => {
                    send_packet(&socket, Packet::Probe(machine.probes_sent() as u32), target.into())
                        .await?;
                }
                Step::Wait => {}
                Step::Finished => break,
            }

            let event = tokio::select! {
                biased;

                () = cancel.notified() => PunchEvent::Cancelled,
                () = &mut deadline => PunchEvent::CeilingExpired,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => match Packet::decode(&buf[..len]) {
                        Some(Packet::Probe(seq)) => {
                            send_packet(&socket, Packet::Ack(seq), from).await?;
                            PunchEvent::DatagramReceived(from)
                        }
                        Some(Packet::Ack(_)) => PunchEvent::DatagramReceived(from),
                        None => {
                            tracing::trace!("Ignoring non-punch datagram from {}", from);
                            step = Step::Wait;
                            continue;
                        }
                    },
                    Err(e) if is_transient(&e) => {
                        step = Step::Wait;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                },
                _ = ticker.tick() => PunchEvent::ProbeTick,
            };

            step = machine.handle(event);
        }

        match (machine.state(), machine.remote()) {
            (PunchState::Established, Some(remote)) => {
                tracing::info!(
                    "Hole punch established {} <-> {} after {} probes in {:?}",
                    local,
                    remote,
                    machine.probes_sent(),
                    started.elapsed()
                );
                Ok(HolePunchOutcome {
                    state: PunchState::Established,
                    local,
                    remote,
                    strategy: machine.strategy(),
                    socket,
                })
            }
            _ if machine.was_cancelled() => {
                tracing::debug!("Hole punch from {} cancelled", local);
                Err(HolePunchError::Cancelled)
            }
            (state, _) => {
                let failure = machine.failure().unwrap_or(PunchFailure::Timeout);
                tracing::warn!(
                    "Hole punch from {} ended {:?} after {} probes: {}",
                    local,
                    state,
                    machine.probes_sent(),
                    failure
                );
                Err(HolePunchError::Failed(failure))
            }
        }
    }
}

async fn send_packet(socket: &UdpSocket, packet: Packet, to: SocketAddr) -> io::Result<()> {
    match socket.send_to(&packet.encode(), to).await {
        Ok(_) => Ok(()),
        Err(e) if is_transient(&e) => {
            tracing::debug!("Send to {} failed: {}", to, e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// ICMP unreachable surfaces as reset/refused on the next socket call
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}
